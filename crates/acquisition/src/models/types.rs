/// Upstream source identifier, e.g. `"YAHOO"`.
pub type SourceId = String;

/// Cache key of a logical request.
pub type RequestKey = String;
