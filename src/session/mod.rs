pub(crate) mod answers;
pub(crate) mod bootstrap;
pub(crate) mod errors;
pub(crate) mod guard;
pub(crate) mod machine;
pub(crate) mod palette;
pub(crate) mod submission;
pub(crate) mod timer;
pub(crate) mod tracking;
