pub mod aid_request;
pub mod notification;
pub mod user;

pub use aid_request::AidRequestRepository;
pub use notification::NotificationRepository;
pub use user::UserRepository;
