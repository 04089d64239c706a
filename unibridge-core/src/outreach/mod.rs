pub mod dm;
pub mod policy;

pub use dm::{render_message, DmRequest, DmSender, SendOutcome, SendStage};
pub use policy::{is_login_wall, ViolationScanner};
