use calmform::form::{FormModel, Value};

#[derive(Clone, Debug, PartialEq, calmform::form::FormModel)]
struct DemoForm {
    email: String,
    age: Option<u32>,
    tags: Vec<String>,
}

fn main() {
    let fields = DemoForm::fields();
    assert_eq!(fields.email(), "email");
    assert_eq!(fields.tags(), "tags");

    let model = DemoForm {
        email: "a@calm.form".to_string(),
        age: None,
        tags: vec!["new".to_string()],
    };
    let values = model.to_values();
    assert_eq!(
        values,
        Value::map([
            ("age", Value::Null),
            ("email", Value::from("a@calm.form")),
            ("tags", Value::list([Value::from("new")])),
        ])
    );
    assert_eq!(DemoForm::from_values(&values), Ok(model));
}
