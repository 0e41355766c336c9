// Business services built on the consistency core

pub mod businesses;
pub mod mail;
pub mod notifications;
pub mod users;

pub use businesses::{BusinessService, CacheTtls};
pub use mail::{HttpMailer, LogMailer, Mailer, OutgoingEmail, TemplateRegistry, TemplateRenderer};
pub use notifications::{NotificationDispatcher, NotificationPublisher};
pub use users::{CredentialTtls, UserService};
