pub mod email;
pub mod notifier;
pub mod template;
pub mod watch;

pub use email::{EmailError, EmailTransport, MemoryEmailTransport, SmtpConfig, SmtpEmailTransport};
pub use notifier::{NotificationIntent, Notifier};
pub use template::{EmailTemplate, RenderedEmail, TemplateKind, TemplateSet};
pub use watch::{ConnectionState, ConnectionTransition, ConnectionWatch};
