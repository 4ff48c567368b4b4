mod parsing;
mod settings;
mod types;

pub(crate) use types::{RouteSettings, SessionSettings, Settings};
