pub(crate) mod answer;
pub(crate) mod attempt;
pub(crate) mod submission;
