pub mod form;
pub mod prelude;

pub use form::{FormApi, FormConfig, create_form};
