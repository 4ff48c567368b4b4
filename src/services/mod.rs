pub(crate) mod backend;
pub(crate) mod local_store;
