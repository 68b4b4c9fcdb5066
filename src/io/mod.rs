//! IO modules - external system interfaces
//!
//! - `dashboard` - Read-only HTTP status page and JSON endpoint
//! - `notify` - Notification queue, worker and log transport
//! - `telegram` - Telegram bot transport
//! - `mqtt` - MQTT notification transport
//! - `hardware` - Linux sysfs sensor, servo and display adapters

pub mod dashboard;
pub mod hardware;
pub mod mqtt;
pub mod notify;
pub mod telegram;

pub use dashboard::run_dashboard;
pub use notify::{
    build_transport, create_notification_channel, start_notifications, LogTransport,
    NotificationSender, NotificationWorker, Transport,
};
