pub mod booking;
pub mod lifecycle;
pub mod notifications;
pub mod payments;
