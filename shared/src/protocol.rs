/// Metadata field carrying the endpoint liveness state
pub const FIELD_STATE: &str = "state";

/// Metadata field carrying the endpoint group label
pub const FIELD_GROUP: &str = "group";

/// State values stored in the `state` field
pub const STATE_ACTIVE: &str = "active";
pub const STATE_INACTIVE: &str = "inactive";

/// Reported when the stored value could not be parsed
pub const STATE_UNKNOWN: &str = "n/a";

/// Separator between service name and address inside a service id
pub const ID_SEPARATOR: char = '@';

/// API path prefix
pub const API_PREFIX: &str = "/v1";
