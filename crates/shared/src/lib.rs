pub mod error;
pub mod models;
pub mod protocol;

pub use error::{try_error_detail, ApiError};
pub use models::*;
pub use protocol::{
    parse_event, ChatClientCommand, ChatServerEvent, NotificationServerEvent, ParsedEvent,
};
