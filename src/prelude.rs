pub use crate::form::{
    FieldConfig, FieldError, FieldPath, FieldState, FieldStateKey, FieldSubscription,
    FieldValidator, FieldValue, FormApi, FormConfig, FormError, FormErrors, FormModel, FormResult,
    FormState, FormStateKey, FormSubscription, FormValidator, IsEqual, Mutator, SubmitHandler,
    SubmitOutcome, SubmitState, Validation, Value, WarningValidator, create_form,
};
