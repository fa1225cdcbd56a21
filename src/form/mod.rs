mod config;
mod controller;
mod error;
mod mutators;
mod notify;
mod path;
mod registry;
mod state;
mod submit;
mod subscription;
mod validation;
mod value;

#[cfg(test)]
mod tests;

pub use calmform_derive::FormModel;
pub use config::{AfterSubmit, BeforeSubmit, DebugHook, FieldConfig, FormConfig, IsEqual};
pub use controller::{FormApi, FormId, create_form};
pub use error::{ConfigError, FormError, FormResult, PathError, ValueError};
pub use mutators::{MutableState, Mutator};
pub use notify::SubscriptionHandle;
pub use path::{FieldPath, PathSegment};
pub use registry::FieldRegistration;
pub use state::{
    FieldError, FieldState, FieldStateKey, FieldSubscription, FormState, FormStateKey,
    FormSubscription,
};
pub use submit::{SubmitHandler, SubmitOutcome, SubmitResult, SubmitState};
pub use subscription::{KeyedSnapshot, StateKey, SubscriberId, Subscription};
pub use validation::{
    BoxError, FieldValidator, FormErrors, FormValidator, Validation, ValidationFuture,
    ValidationResult, WarningValidator,
};
pub use value::{FieldValue, FormModel, Value};
#[doc(hidden)]
pub use value::{child_path, field_of};
