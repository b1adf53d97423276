mod alert;
mod meta;
mod silence;

pub use alert::{Alert, AlertSpec, AlertStatus};
pub use meta::{ObjectKey, ObjectMeta, Resource};
pub use silence::{Matcher, Silence, SilenceSpec, SilenceStatus};

/// Finalizer which gates the erasure of a Silence upon the deletion of its
/// remote counterpart. It's present only while a remote silence may exist.
pub const FINALIZER: &str = "alert-operator";

/// Label attached to Silences which are linked to a remote silence,
/// recording the remote silence ID.
pub const SILENCE_ID_LABEL: &str = "alertmanager.prometheus.io/silenceID";
