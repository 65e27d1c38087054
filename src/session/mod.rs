//! Session lifecycle, annotation timeline and the persisted record.

mod record;
#[allow(clippy::module_inception)]
mod session;

pub use record::{RecordError, SessionRecord};
pub use session::{Annotation, Session, SessionError, SessionState};
