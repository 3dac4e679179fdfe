pub const TOPIC_CONTROLLER_STATE: &str = "cloudlight/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "cloudlight/controller/status";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
