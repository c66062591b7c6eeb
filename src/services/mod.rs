pub mod aid_requests;
pub mod approval;
pub mod auth;
pub mod init;
pub mod notifications;
pub mod tracking;
