use super::*;
use futures::channel::oneshot;
use futures::executor::block_on;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, FormModel)]
struct ProfileForm {
    name: String,
    email: String,
    age: Option<u32>,
}

fn path(name: &str) -> FieldPath {
    FieldPath::parse(name).expect("valid field path")
}

fn record<S>(log: &Arc<Mutex<Vec<S>>>) -> impl Fn(&S) + Send + Sync + 'static
where
    S: Clone + Send + Sync + 'static,
{
    let log = log.clone();
    move |state: &S| log.lock().expect("log lock").push(state.clone())
}

fn text(form: &FormApi, name: &str) -> Value {
    form.get_state()
        .expect("form state")
        .values
        .get_or_null(&path(name))
}

fn register(form: &FormApi, name: &str, config: FieldConfig) -> FieldRegistration {
    form.register_field(name, |_| {}, FieldSubscription::all(), config)
        .expect("register field")
}

/// Async field validator whose results are handed out one dispatch at a time
/// through the returned senders.
fn gated_validator(
    dispatches: usize,
) -> (FieldValidator, Vec<oneshot::Sender<Option<FieldError>>>) {
    let mut senders = Vec::new();
    let mut receivers = VecDeque::new();
    for _ in 0..dispatches {
        let (tx, rx) = oneshot::channel();
        senders.push(tx);
        receivers.push_back(rx);
    }
    let receivers = Arc::new(Mutex::new(receivers));
    let validator = FieldValidator::future(move |_value, _values| {
        let gate = receivers.lock().expect("gate lock").pop_front();
        async move {
            let Some(gate) = gate else {
                return Ok(None);
            };
            gate.await.map_err(|err| Box::new(err) as BoxError)
        }
    });
    (validator, senders)
}

#[test]
fn batch_coalesces_changes_into_one_notification() {
    let form = create_form(FormConfig::new().initial_values(Value::map([
        ("first", Value::from("")),
        ("last", Value::from("")),
    ])));
    let seen = Arc::new(Mutex::new(Vec::<FormState>::new()));
    let _subscription = form
        .subscribe(
            record(&seen),
            FormSubscription::only([FormStateKey::Values]),
        )
        .expect("subscribe");
    assert_eq!(seen.lock().expect("seen").len(), 1);

    form.batch(|| {
        form.change("first", "a").expect("change first");
        form.change("last", "b").expect("change last");
        form.change("first", "c").expect("change first again");
    })
    .expect("batch");

    let seen = seen.lock().expect("seen");
    assert_eq!(seen.len(), 2);
    let last = seen.last().expect("batched state");
    assert_eq!(last.values.get_or_null(&path("first")), Value::from("c"));
    assert_eq!(last.values.get_or_null(&path("last")), Value::from("b"));
}

#[test]
fn unbatched_changes_notify_once_each() {
    let form = create_form(FormConfig::new());
    let seen = Arc::new(Mutex::new(Vec::<FormState>::new()));
    let _subscription = form
        .subscribe(record(&seen), FormSubscription::all())
        .expect("subscribe");

    form.change("a", 1).expect("change a");
    form.change("b", 2).expect("change b");
    assert_eq!(seen.lock().expect("seen").len(), 3);
}

#[test]
fn subscribers_with_unchanged_keys_are_not_notified() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from(""))])));
    let submitting = Arc::new(Mutex::new(Vec::<FormState>::new()));
    let _form_subscription = form
        .subscribe(
            record(&submitting),
            FormSubscription::only([FormStateKey::Submitting]),
        )
        .expect("subscribe");
    let touched = Arc::new(Mutex::new(Vec::<FieldState>::new()));
    let _field = form
        .register_field(
            "name",
            record(&touched),
            FieldSubscription::only([FieldStateKey::Touched]),
            FieldConfig::new(),
        )
        .expect("register");

    form.change("name", "x").expect("change");
    form.focus("name").expect("focus");
    form.change("name", "xy").expect("change again");
    assert_eq!(submitting.lock().expect("submitting").len(), 1);
    assert_eq!(touched.lock().expect("touched").len(), 1);

    form.blur("name").expect("blur");
    let touched = touched.lock().expect("touched");
    assert_eq!(touched.len(), 2);
    assert!(touched[1].touched);
    assert_eq!(submitting.lock().expect("submitting").len(), 1);
}

#[test]
fn subscribers_for_lists_interested_subscribers_until_unsubscribed() {
    let form = create_form(FormConfig::new());
    let values = form
        .subscribe(|_| {}, FormSubscription::only([FormStateKey::Values]))
        .expect("subscribe values");
    let everything = form
        .subscribe(|_| {}, FormSubscription::all())
        .expect("subscribe all");
    let values_id = values.id();
    let everything_id = everything.id();

    assert_eq!(
        form.subscribers_for(FormStateKey::Values).expect("subscribers"),
        vec![values_id, everything_id]
    );
    assert_eq!(
        form.subscribers_for(FormStateKey::Touched).expect("subscribers"),
        vec![everything_id]
    );

    values.unsubscribe().expect("unsubscribe");
    assert_eq!(
        form.subscribers_for(FormStateKey::Values).expect("subscribers"),
        vec![everything_id]
    );
}

#[test]
fn field_equality_override_controls_dirty_and_value_notifications() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("code", Value::from("abc"))])));
    let seen = Arc::new(Mutex::new(Vec::<FieldState>::new()));
    let case_insensitive = IsEqual::new(|left, right| match (left.as_text(), right.as_text()) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        _ => left == right,
    });
    let _code = form
        .register_field(
            "code",
            record(&seen),
            FieldSubscription::only([FieldStateKey::Value]),
            FieldConfig::new().is_equal(case_insensitive),
        )
        .expect("register");

    form.change("code", "ABC").expect("change");
    assert_eq!(seen.lock().expect("seen").len(), 1);
    let state = form.get_state().expect("state");
    assert!(state.pristine);
    assert!(state.dirty_fields.is_empty());

    form.change("code", "abd").expect("change");
    assert_eq!(seen.lock().expect("seen").len(), 2);
    assert!(form.get_state().expect("state").dirty);
}

#[test]
fn listeners_are_called_in_registration_order() {
    let form = create_form(FormConfig::new());
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let push = |label: &'static str| {
        let order = order.clone();
        move || order.lock().expect("order").push(label)
    };

    let first = push("form-1");
    let _first = form
        .subscribe(move |_| first(), FormSubscription::all())
        .expect("subscribe first");
    let field = push("field");
    let _field = form
        .register_field(
            "name",
            move |_| field(),
            FieldSubscription::all(),
            FieldConfig::new(),
        )
        .expect("register");
    let second = push("form-2");
    let _second = form
        .subscribe(move |_| second(), FormSubscription::all())
        .expect("subscribe second");

    order.lock().expect("order").clear();
    form.change("name", "x").expect("change");
    assert_eq!(
        *order.lock().expect("order"),
        vec!["form-1", "field", "form-2"]
    );
}

#[test]
fn registering_the_same_validator_twice_is_idempotent() {
    let form = create_form(FormConfig::new());
    let required = FieldValidator::required("Required");
    let first = register(&form, "name", FieldConfig::new().validate(required.clone()));
    let second = register(&form, "name", FieldConfig::new().validate(required));
    assert!(first.config_error().is_none());
    assert!(second.config_error().is_none());
    assert_eq!(
        form.get_registered_fields().expect("fields"),
        vec![path("name")]
    );

    first.unregister().expect("unregister first");
    assert_eq!(
        form.get_registered_fields().expect("fields"),
        vec![path("name")]
    );
    assert_eq!(
        form.get_state().expect("state").errors.get(&path("name")),
        Some(&FieldError::from("Required"))
    );

    second.unregister().expect("unregister second");
    assert!(form.get_registered_fields().expect("fields").is_empty());
}

#[test]
fn conflicting_validators_are_reported_but_not_fatal() {
    let form = create_form(FormConfig::new());
    let _first = register(
        &form,
        "name",
        FieldConfig::new().validate(FieldValidator::required("first")),
    );
    let second = register(
        &form,
        "name",
        FieldConfig::new().validate(FieldValidator::required("second")),
    );
    assert_eq!(
        second.config_error(),
        Some(&ConfigError::ConflictingValidator { path: path("name") })
    );
    let field = form
        .get_field_state("name")
        .expect("field state")
        .expect("registered");
    assert_eq!(field.error, Some(FieldError::from("first")));
}

#[test]
fn invalid_paths_are_rejected_at_the_boundary() {
    let form = create_form(FormConfig::new());
    assert!(matches!(
        form.change("items[", 1),
        Err(FormError::InvalidPath(PathError::UnclosedBracket { .. }))
    ));
    assert!(matches!(
        form.register_field("", |_| {}, FieldSubscription::all(), FieldConfig::new()),
        Err(FormError::InvalidPath(PathError::Empty))
    ));
}

#[test]
fn stale_async_result_is_discarded() {
    let (validator, mut gates) = gated_validator(2);
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from("a"))])));
    let _name = register(&form, "name", FieldConfig::new().validate(validator));
    form.change("name", "b").expect("change");

    let field = form
        .get_field_state("name")
        .expect("field state")
        .expect("registered");
    assert!(field.validating);
    assert!(form.get_state().expect("state").validating);

    let for_b = gates.pop().expect("gate for b");
    let for_a = gates.pop().expect("gate for a");
    assert!(
        for_a.send(Some(FieldError::from("taken: a"))).is_err(),
        "superseded validation should already be dropped"
    );
    for_b.send(None).expect("resolve b");
    block_on(form.wait_for_validation()).expect("drive validation");

    let field = form
        .get_field_state("name")
        .expect("field state")
        .expect("registered");
    assert_eq!(field.error, None);
    assert!(!field.validating);
    assert!(form.get_state().expect("state").valid);
}

#[test]
fn current_async_result_is_applied_even_when_stale_one_is_clean() {
    let (validator, mut gates) = gated_validator(2);
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from("a"))])));
    let _name = register(&form, "name", FieldConfig::new().validate(validator));
    form.change("name", "b").expect("change");

    let for_b = gates.pop().expect("gate for b");
    let for_a = gates.pop().expect("gate for a");
    for_b
        .send(Some(FieldError::from("taken: b")))
        .expect("resolve b");
    assert!(for_a.send(None).is_err());
    block_on(form.wait_for_validation()).expect("drive validation");

    let state = form.get_state().expect("state");
    assert_eq!(
        state.errors.get(&path("name")),
        Some(&FieldError::from("taken: b"))
    );
    assert!(state.invalid);
    assert!(!state.validating);
}

#[test]
fn failed_async_validator_counts_as_no_error() {
    let form = create_form(FormConfig::new());
    let failing = FieldValidator::future(|_value, _values| async {
        Err::<Option<FieldError>, BoxError>("backend unavailable".into())
    });
    let _name = register(&form, "name", FieldConfig::new().validate(failing));
    let result = block_on(form.validate_async()).expect("validate");
    assert!(result.is_valid());
    assert_eq!(result.pending, 0);
}

#[test]
fn whole_form_validator_fills_in_field_errors() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([
                ("password", Value::from("secret")),
                ("confirm", Value::from("other")),
            ]))
            .validate(FormValidator::sync(|values| {
                let password = values.get_or_null(&path("password"));
                let confirm = values.get_or_null(&path("confirm"));
                if password == confirm {
                    FormErrors::new()
                } else {
                    FormErrors::new().field("confirm", "Does not match")
                }
            })),
    );
    let _confirm = register(&form, "confirm", FieldConfig::new());
    let field = form
        .get_field_state("confirm")
        .expect("field state")
        .expect("registered");
    assert_eq!(field.error, Some(FieldError::from("Does not match")));

    form.change("confirm", "secret").expect("change");
    let state = form.get_state().expect("state");
    assert!(state.errors.is_empty());
    assert!(state.valid);
}

#[test]
fn async_form_validator_reports_form_error() {
    let form = create_form(FormConfig::new().validate(FormValidator::future(|values| async move {
        let errors = if values.get_in(&path("email")).is_some() {
            FormErrors::new()
        } else {
            FormErrors::new()
                .with_form("Incomplete")
                .field("email", "Required")
        };
        Ok::<_, BoxError>(errors)
    })));
    let result = block_on(form.validate_async()).expect("validate");
    assert_eq!(result.error, Some(FieldError::from("Incomplete")));
    assert_eq!(
        result.errors.get(&path("email")),
        Some(&FieldError::from("Required"))
    );
    assert!(!form.get_state().expect("state").validating);
}

#[test]
fn validate_fields_limits_field_revalidation() {
    let other_runs = Arc::new(AtomicUsize::new(0));
    let counted = {
        let other_runs = other_runs.clone();
        FieldValidator::sync(move |_value, _values| {
            other_runs.fetch_add(1, Ordering::SeqCst);
            None
        })
    };
    let form = create_form(FormConfig::new());
    let _other = register(&form, "other", FieldConfig::new().validate(counted));
    let _name = register(
        &form,
        "name",
        FieldConfig::new()
            .validate(FieldValidator::required("Required"))
            .validate_fields(Vec::<String>::new()),
    );
    assert_eq!(other_runs.load(Ordering::SeqCst), 2);

    form.change("name", "x").expect("change name");
    assert_eq!(other_runs.load(Ordering::SeqCst), 2);

    form.change("other", "y").expect("change other");
    assert_eq!(other_runs.load(Ordering::SeqCst), 3);
}

#[test]
fn warnings_do_not_affect_validity() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from("ab"))])));
    let _name = register(
        &form,
        "name",
        FieldConfig::new().warn(WarningValidator::new(|value, _| {
            value
                .as_text()
                .is_some_and(|text| text.len() < 3)
                .then(|| FieldError::from("Short"))
        })),
    );
    let state = form.get_state().expect("state");
    assert!(state.valid);
    assert_eq!(
        state.warnings.get(&path("name")),
        Some(&FieldError::from("Short"))
    );
}

#[test]
fn validate_on_blur_defers_validation_until_blur() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from("x"))]))
            .validate_on_blur(true),
    );
    let _name = register(
        &form,
        "name",
        FieldConfig::new().validate(FieldValidator::required("Required")),
    );
    form.focus("name").expect("focus");
    form.change("name", "").expect("change");
    assert!(form.get_state().expect("state").errors.is_empty());

    form.blur("name").expect("blur");
    let state = form.get_state().expect("state");
    assert_eq!(
        state.errors.get(&path("name")),
        Some(&FieldError::from("Required"))
    );
    assert_eq!(state.active, None);
    assert!(state.touched.contains(&path("name")));
    assert!(state.visited.contains(&path("name")));
}

#[test]
fn paused_validation_runs_once_on_resume() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from("x"))])));
    let _name = register(
        &form,
        "name",
        FieldConfig::new().validate(FieldValidator::required("Required")),
    );
    form.pause_validation().expect("pause");
    assert!(form.is_validation_paused().expect("paused"));
    form.change("name", "").expect("change");
    assert!(form.get_state().expect("state").valid);

    form.resume_validation().expect("resume");
    assert!(!form.get_state().expect("state").valid);
}

#[test]
fn submit_blocks_invalid_form_then_succeeds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = calls.clone();
        SubmitHandler::sync(move |_values| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from(""))]))
            .on_submit(handler),
    );
    let _name = register(
        &form,
        "name",
        FieldConfig::new().validate(FieldValidator::required("Required")),
    );

    let outcome = block_on(form.submit()).expect("submit");
    match outcome {
        SubmitOutcome::Invalid(result) => assert_eq!(
            result.errors.get(&path("name")),
            Some(&FieldError::from("Required"))
        ),
        other => panic!("expected invalid outcome, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let state = form.get_state().expect("state");
    assert!(state.submit_failed);
    assert!(!state.submitting);
    assert_eq!(state.submit_phase, SubmitState::Failed);
    assert!(state.touched.contains(&path("name")));

    form.change("name", "x").expect("change");
    let outcome = block_on(form.submit()).expect("submit");
    assert_eq!(outcome, SubmitOutcome::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let state = form.get_state().expect("state");
    assert!(!state.submitting);
    assert!(!state.has_submit_errors);
    assert!(state.submit_succeeded);
    assert!(!state.submit_failed);
    assert_eq!(state.submit_count, 2);
    assert_eq!(state.submit_phase, SubmitState::Succeeded);
    assert_eq!(state.last_submitted_values, Some(state.values.clone()));
    assert!(!state.dirty_since_last_submit);
}

#[test]
fn submit_errors_are_published_and_cleared_by_change() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from("taken"))]))
            .on_submit(SubmitHandler::new(|values, _form| async move {
                if values.get_or_null(&path("name")) == Value::from("taken") {
                    Err(FormErrors::new().field("name", "Already taken"))
                } else {
                    Ok(())
                }
            })),
    );
    let seen = Arc::new(Mutex::new(Vec::<FieldState>::new()));
    let _name = form
        .register_field(
            "name",
            record(&seen),
            FieldSubscription::only([FieldStateKey::SubmitError]),
            FieldConfig::new(),
        )
        .expect("register");

    let outcome = block_on(form.submit()).expect("submit");
    assert_eq!(
        outcome,
        SubmitOutcome::Failed(FormErrors::new().field("name", "Already taken"))
    );
    let state = form.get_state().expect("state");
    assert!(state.has_submit_errors);
    assert!(!state.has_validation_errors);
    assert!(state.invalid);
    assert_eq!(
        seen.lock().expect("seen").last().and_then(|s| s.submit_error.clone()),
        Some(FieldError::from("Already taken"))
    );

    form.change("name", "free").expect("change");
    let state = form.get_state().expect("state");
    assert!(state.submit_errors.is_empty());
    assert!(state.valid);
    assert!(state.dirty_since_last_submit);
    assert_eq!(seen.lock().expect("seen").len(), 3);
}

#[test]
fn submit_while_submitting_is_a_no_op() {
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let form = create_form(FormConfig::new().on_submit(SubmitHandler::new(move |_values, _form| {
        let gate = gate.lock().expect("gate").take();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(())
        }
    })));

    let background = form.clone();
    let first = thread::spawn(move || block_on(background.submit()));
    while !form.get_state().expect("state").submitting {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(
        block_on(form.submit()).expect("second submit"),
        SubmitOutcome::AlreadySubmitting
    );

    release.send(()).expect("release");
    let outcome = first.join().expect("submit thread").expect("first submit");
    assert_eq!(outcome, SubmitOutcome::Succeeded);
    assert_eq!(form.get_state().expect("state").submit_count, 1);
}

#[test]
fn before_submit_hook_can_cancel_and_after_submit_runs_on_success() {
    let allow = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let form = create_form(FormConfig::new().on_submit(SubmitHandler::sync(|_| Ok(()))));
    let _name = register(
        &form,
        "name",
        FieldConfig::new()
            .before_submit({
                let allow = allow.clone();
                move || allow.load(Ordering::SeqCst) > 0
            })
            .after_submit({
                let after = after.clone();
                move || {
                    after.fetch_add(1, Ordering::SeqCst);
                }
            }),
    );

    assert_eq!(
        block_on(form.submit()).expect("submit"),
        SubmitOutcome::Cancelled
    );
    assert_eq!(
        form.get_state().expect("state").submit_phase,
        SubmitState::Idle
    );
    assert_eq!(after.load(Ordering::SeqCst), 0);

    allow.store(1, Ordering::SeqCst);
    assert_eq!(
        block_on(form.submit()).expect("submit"),
        SubmitOutcome::Succeeded
    );
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn removing_an_item_shifts_metadata_and_drops_its_registration() {
    let form = create_form(FormConfig::new().initial_values(Value::map([(
        "items",
        Value::list([Value::from("A"), Value::from("B"), Value::from("C")]),
    )])));
    let registrations = ["items[0]", "items[1]", "items[2]"]
        .into_iter()
        .map(|name| {
            let registration = register(&form, name, FieldConfig::new());
            form.focus(name).expect("focus");
            form.blur(name).expect("blur");
            registration
        })
        .collect::<Vec<_>>();

    let removed = form.remove("items", 1).expect("remove");
    assert_eq!(removed, Value::from("B"));
    assert_eq!(
        text(&form, "items"),
        Value::list([Value::from("A"), Value::from("C")])
    );
    assert_eq!(
        form.get_registered_fields().expect("fields"),
        vec![path("items[0]"), path("items[1]")]
    );

    let first = form
        .get_field_state("items[0]")
        .expect("field state")
        .expect("registered");
    assert!(first.touched);
    assert!(first.visited);
    assert_eq!(first.value, Value::from("A"));
    let second = form
        .get_field_state("items[1]")
        .expect("field state")
        .expect("registered");
    assert!(second.touched);
    assert_eq!(second.value, Value::from("C"));

    let mut registrations = registrations.into_iter();
    let _a = registrations.next().expect("a");
    let b = registrations.next().expect("b");
    let c = registrations.next().expect("c");
    b.unregister().expect("unregistering a dropped registration is a no-op");
    assert_eq!(form.get_registered_fields().expect("fields").len(), 2);
    c.unregister().expect("unregister moved registration");
    assert_eq!(
        form.get_registered_fields().expect("fields"),
        vec![path("items[0]")]
    );
}

#[test]
fn array_mutators_move_metadata_with_items() {
    let form = create_form(FormConfig::new().initial_values(Value::map([(
        "items",
        Value::list([Value::from("A"), Value::from("B")]),
    )])));
    let _first = register(&form, "items[0]", FieldConfig::new());
    let _second = register(&form, "items[1]", FieldConfig::new());
    form.blur("items[0]").expect("blur");

    form.swap("items", 0, 1).expect("swap");
    assert_eq!(
        text(&form, "items"),
        Value::list([Value::from("B"), Value::from("A")])
    );
    let touched = form.get_state().expect("state").touched;
    assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![path("items[1]")]);

    form.insert("items", 0, "Z").expect("insert");
    form.push("items", "Y").expect("push");
    assert_eq!(
        text(&form, "items"),
        Value::list([
            Value::from("Z"),
            Value::from("B"),
            Value::from("A"),
            Value::from("Y"),
        ])
    );
    assert!(form.get_state().expect("state").touched.contains(&path("items[2]")));

    form.move_item("items", 2, 0).expect("move");
    assert!(form.get_state().expect("state").touched.contains(&path("items[0]")));
    assert_eq!(form.pop("items").expect("pop"), Some(Value::from("Y")));

    assert!(matches!(
        form.remove("items", 9),
        Err(FormError::IndexOutOfBounds { index: 9, len: 3, .. })
    ));
    form.change("scalar", "text").expect("change");
    assert!(matches!(
        form.push("scalar", 1),
        Err(FormError::NotAList(_))
    ));
}

#[test]
fn list_field_reports_length() {
    let form = create_form(FormConfig::new());
    let lengths = Arc::new(Mutex::new(Vec::<FieldState>::new()));
    let _items = form
        .register_field(
            "items",
            record(&lengths),
            FieldSubscription::only([FieldStateKey::Length]),
            FieldConfig::new(),
        )
        .expect("register");
    form.push("items", "a").expect("push");
    form.push("items", "b").expect("push");

    let lengths = lengths.lock().expect("lengths");
    assert_eq!(
        lengths.iter().map(|state| state.length).collect::<Vec<_>>(),
        vec![None, Some(1), Some(2)]
    );
}

#[test]
fn custom_mutators_run_by_name() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from("x"))]))
            .mutator(
                "set_name",
                Mutator::new(|args, state| {
                    let value = args.first().cloned().unwrap_or_default();
                    state.change_value("name", value)?;
                    state.set_touched("name", true)
                }),
            ),
    );
    let _name = register(&form, "name", FieldConfig::new());

    form.mutate("set_name", &[Value::from("mutated")])
        .expect("mutate");
    let state = form.get_state().expect("state");
    assert_eq!(state.values.get_or_null(&path("name")), Value::from("mutated"));
    assert!(state.touched.contains(&path("name")));
    assert!(state.modified.contains(&path("name")));

    assert_eq!(
        form.mutate("missing", &[]),
        Err(FormError::UnknownMutator("missing".to_string()))
    );
}

#[test]
fn initialize_keeps_dirty_fields_when_configured() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("a", Value::from("1")), ("b", Value::from("2"))]))
            .keep_dirty_on_reinitialize(true),
    );
    let _a = register(&form, "a", FieldConfig::new());
    let _b = register(&form, "b", FieldConfig::new());
    form.change("a", "changed").expect("change");

    form.initialize(Value::map([("a", Value::from("10")), ("b", Value::from("20"))]))
        .expect("initialize");
    assert_eq!(text(&form, "a"), Value::from("changed"));
    assert_eq!(text(&form, "b"), Value::from("20"));

    form.blur("a").expect("blur");
    form.reset(None).expect("reset");
    let state = form.get_state().expect("state");
    assert_eq!(state.values, state.initial_values);
    assert_eq!(state.values.get_or_null(&path("a")), Value::from("10"));
    assert!(state.pristine);
    assert!(state.touched.is_empty());
    assert!(state.modified.is_empty());
}

#[test]
fn initialize_replaces_everything_by_default() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("a", Value::from("1"))])));
    let _a = register(&form, "a", FieldConfig::new());
    form.change("a", "changed").expect("change");
    form.initialize(Value::map([("a", Value::from("10"))]))
        .expect("initialize");
    let state = form.get_state().expect("state");
    assert_eq!(state.values.get_or_null(&path("a")), Value::from("10"));
    assert!(state.pristine);
}

#[test]
fn field_initial_and_default_values_seed_the_form() {
    let form = create_form(FormConfig::new());
    let _name = register(&form, "name", FieldConfig::new().initial_value("init"));
    let _role = register(&form, "role", FieldConfig::new().default_value("user"));
    let state = form.get_state().expect("state");
    assert_eq!(state.values.get_or_null(&path("name")), Value::from("init"));
    assert_eq!(
        state.initial_values.get_or_null(&path("name")),
        Value::from("init")
    );
    assert_eq!(state.values.get_or_null(&path("role")), Value::from("user"));
    assert!(state.dirty_fields.contains(&path("role")));
}

#[test]
fn destroy_on_unregister_removes_the_value() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from("x")), ("keep", Value::from("y"))]))
            .destroy_on_unregister(true),
    );
    let name = register(&form, "name", FieldConfig::new());
    name.unregister().expect("unregister");
    let state = form.get_state().expect("state");
    assert_eq!(state.values.get_in(&path("name")), None);
    assert_eq!(state.values.get_or_null(&path("keep")), Value::from("y"));
}

#[test]
fn reset_field_state_clears_one_fields_metadata() {
    let form = create_form(FormConfig::new());
    let _a = register(&form, "a", FieldConfig::new());
    let _b = register(&form, "b", FieldConfig::new());
    form.focus("a").expect("focus");
    form.blur("a").expect("blur");
    form.blur("b").expect("blur");
    form.reset_field_state("a").expect("reset a");
    let state = form.get_state().expect("state");
    assert_eq!(state.touched.into_iter().collect::<Vec<_>>(), vec![path("b")]);
    assert!(state.visited.is_empty());
}

#[test]
fn listener_may_change_the_form_during_notification() {
    let form = create_form(FormConfig::new());
    let upper = form.clone();
    let _subscription = form
        .subscribe(
            move |state| {
                let name = state.values.get_or_null(&path("name"));
                let Some(name) = name.as_text() else {
                    return;
                };
                let expected = Value::from(name.to_uppercase());
                if state.values.get_or_null(&path("upper")) != expected {
                    upper.change("upper", expected).expect("nested change");
                }
            },
            FormSubscription::only([FormStateKey::Values]),
        )
        .expect("subscribe");

    form.change("name", "abc").expect("change");
    assert_eq!(text(&form, "upper"), Value::from("ABC"));
}

#[test]
fn debug_hook_sees_every_notification_pass() {
    let passes = Arc::new(AtomicUsize::new(0));
    let form = create_form(FormConfig::new().debug({
        let passes = passes.clone();
        move |_form, fields| {
            assert!(fields.contains_key(&path("name")));
            passes.fetch_add(1, Ordering::SeqCst);
        }
    }));
    let _name = register(&form, "name", FieldConfig::new());
    form.change("name", "x").expect("change");
    assert_eq!(passes.load(Ordering::SeqCst), 2);
}

#[test]
fn destroyed_form_rejects_every_operation() {
    let form = create_form(FormConfig::new());
    let name = register(&form, "name", FieldConfig::new());
    let subscription = form
        .subscribe(|_| {}, FormSubscription::all())
        .expect("subscribe");
    form.destroy().expect("destroy");

    assert!(form.is_destroyed().expect("destroyed flag"));
    assert_eq!(form.change("name", "x"), Err(FormError::Destroyed));
    assert!(matches!(form.get_state(), Err(FormError::Destroyed)));
    assert_eq!(name.unregister(), Err(FormError::Destroyed));
    assert_eq!(subscription.unsubscribe(), Err(FormError::Destroyed));
    assert!(matches!(
        block_on(form.submit()),
        Err(FormError::Destroyed)
    ));
    assert_eq!(form.destroy(), Err(FormError::Destroyed));
}

#[test]
fn typed_models_round_trip_through_values() {
    let model = ProfileForm {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        age: Some(36),
    };
    let form = create_form(FormConfig::new().initial_model(&model));
    let fields = ProfileForm::fields();
    form.change(fields.email(), "ada@calm.form").expect("change");

    let values = form.values_as::<ProfileForm>().expect("typed values");
    assert_eq!(values.name, "Ada");
    assert_eq!(values.email, "ada@calm.form");
    assert_eq!(values.age, Some(36));

    form.change(fields.age(), "old").expect("change");
    assert!(matches!(
        form.values_as::<ProfileForm>(),
        Err(FormError::ValueConversion(ValueError::TypeMismatch { .. }))
    ));
}

fn never_resolves_for(stuck: &'static str) -> FieldValidator {
    FieldValidator::new(move |value, _values, _state| {
        if value.as_text() == Some(stuck) {
            Validation::pending(futures::future::pending::<Result<Option<FieldError>, BoxError>>())
        } else {
            Validation::ready(None)
        }
    })
}

#[test]
fn superseded_validation_that_never_resolves_does_not_block_submit() {
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("name", Value::from("a"))]))
            .on_submit(SubmitHandler::sync(|_values| Ok(()))),
    );
    let _name = register(&form, "name", FieldConfig::new().validate(never_resolves_for("a")));
    assert!(form.get_state().expect("state").validating);
    form.change("name", "b").expect("change");
    assert!(!form.get_state().expect("state").validating);

    let (tx, rx) = std::sync::mpsc::channel();
    let submitter = form.clone();
    thread::spawn(move || {
        let _ = tx.send(block_on(submitter.submit()));
    });
    let outcome = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("submit finished")
        .expect("submit");
    assert_eq!(outcome, SubmitOutcome::Succeeded);
}

#[test]
fn running_validation_is_aborted_once_superseded() {
    let form = create_form(FormConfig::new().initial_values(Value::map([("name", Value::from("a"))])));
    let _name = register(&form, "name", FieldConfig::new().validate(never_resolves_for("a")));

    let (tx, rx) = std::sync::mpsc::channel();
    let driver = form.clone();
    thread::spawn(move || {
        let _ = tx.send(block_on(driver.wait_for_validation()));
    });
    thread::sleep(Duration::from_millis(20));
    form.change("name", "b").expect("change");

    rx.recv_timeout(Duration::from_secs(5))
        .expect("driver finished")
        .expect("drive validation");
    let field = form
        .get_field_state("name")
        .expect("field state")
        .expect("registered");
    assert!(!field.validating);
    assert_eq!(field.error, None);
}

#[test]
fn writes_that_do_not_fit_the_value_tree_are_rejected() {
    let form = create_form(FormConfig::new().initial_values(Value::map([
        ("name", Value::from("Ada")),
        ("email", Value::from("ada@example.com")),
    ])));
    let before = form.get_state().expect("state").values;

    assert_eq!(
        form.change(&format!("items[{}]", usize::MAX), "x"),
        Err(FormError::ValueConversion(ValueError::IndexTooFar {
            path: "items".to_string(),
            index: usize::MAX,
            len: 0,
        }))
    );
    assert_eq!(
        form.change("0", "x"),
        Err(FormError::ValueConversion(ValueError::TypeMismatch {
            path: String::new(),
            expected: "list",
            found: "map",
        }))
    );

    let state = form.get_state().expect("form still usable");
    assert_eq!(state.values, before);
    form.change("name", "Grace").expect("change after rejected writes");
    assert_eq!(text(&form, "name"), Value::from("Grace"));
}

#[test]
fn unregistered_values_count_towards_dirty() {
    let form = create_form(FormConfig::new().initial_values(Value::map([
        ("a", Value::from("")),
        ("b", Value::from("")),
    ])));
    let _a = register(&form, "a", FieldConfig::new());

    form.change("b", "changed").expect("change");
    let state = form.get_state().expect("state");
    assert!(state.dirty);
    assert!(!state.pristine);
    assert!(state.dirty_fields.is_empty());

    form.change("b", "").expect("change back");
    assert!(form.get_state().expect("state").pristine);
}

#[test]
fn subscribers_added_by_a_listener_are_first_called_in_the_next_pass() {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let form = create_form(FormConfig::new().debug({
        let log = log.clone();
        move |_form, _fields| log.lock().expect("log").push("pass")
    }));
    let added = Arc::new(Mutex::new(Vec::<SubscriptionHandle>::new()));
    let registered = Arc::new(Mutex::new(Vec::<FieldRegistration>::new()));
    let _first = form
        .subscribe(
            {
                let form = form.clone();
                let log = log.clone();
                let added = added.clone();
                let registered = registered.clone();
                move |state| {
                    if state.values.get_in(&path("name")).is_none() {
                        return;
                    }
                    log.lock().expect("log").push("A");
                    let subscription = form
                        .subscribe(
                            {
                                let log = log.clone();
                                move |_: &FormState| log.lock().expect("log").push("B")
                            },
                            FormSubscription::only([FormStateKey::Values]),
                        )
                        .expect("nested subscribe");
                    added.lock().expect("added").push(subscription);
                    let late = form
                        .register_field(
                            "late",
                            {
                                let log = log.clone();
                                move |_: &FieldState| log.lock().expect("log").push("late")
                            },
                            FieldSubscription::only([FieldStateKey::Value]),
                            FieldConfig::new(),
                        )
                        .expect("nested register");
                    registered.lock().expect("registered").push(late);
                }
            },
            FormSubscription::only([FormStateKey::Values]),
        )
        .expect("subscribe");
    log.lock().expect("log").clear();

    form.change("name", "x").expect("change");
    assert_eq!(
        *log.lock().expect("log"),
        vec!["A", "pass", "B", "late", "pass"]
    );
}

#[test]
fn unregistering_during_a_pass_still_notifies_fields_planned_for_it() {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let to_drop = Arc::new(Mutex::new(None::<FieldRegistration>));
    let form = create_form(FormConfig::new());
    let listen = |name: &'static str| {
        let log = log.clone();
        let to_drop = to_drop.clone();
        move |_: &FieldState| {
            log.lock().expect("log").push(name);
            if name == "a" {
                if let Some(registration) = to_drop.lock().expect("to_drop").take() {
                    registration.unregister().expect("unregister b");
                }
            }
        }
    };
    let subscription = || FieldSubscription::only([FieldStateKey::Value]);
    let _a = form
        .register_field("a", listen("a"), subscription(), FieldConfig::new())
        .expect("register a");
    let b = form
        .register_field("b", listen("b"), subscription(), FieldConfig::new())
        .expect("register b");
    let _c = form
        .register_field("c", listen("c"), subscription(), FieldConfig::new())
        .expect("register c");
    *to_drop.lock().expect("to_drop") = Some(b);
    log.lock().expect("log").clear();

    form.batch(|| {
        form.change("a", "1").expect("change a");
        form.change("b", "1").expect("change b");
        form.change("c", "1").expect("change c");
    })
    .expect("batch");
    assert_eq!(*log.lock().expect("log"), vec!["a", "b", "c"]);
    assert!(!form
        .get_registered_fields()
        .expect("registered")
        .contains(&path("b")));

    form.change("b", "2").expect("change b again");
    assert_eq!(*log.lock().expect("log"), vec!["a", "b", "c"]);
}

#[test]
fn pending_form_validation_keeps_previous_errors_until_it_lands() {
    let (release, gate) = oneshot::channel::<FormErrors>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let form = create_form(
        FormConfig::new()
            .initial_values(Value::map([("mode", Value::from("sync"))]))
            .validate(FormValidator::new(move |values| {
                if values.get_or_null(&path("mode")) == Value::from("sync") {
                    return Validation::ready(FormErrors::new().field("x", "old"));
                }
                let gate = gate.lock().expect("gate").take();
                Validation::pending(async move {
                    match gate {
                        Some(gate) => gate.await.map_err(|err| Box::new(err) as BoxError),
                        None => Ok(FormErrors::new()),
                    }
                })
            })),
    );
    let _mode = register(&form, "mode", FieldConfig::new());
    assert_eq!(
        form.get_state().expect("state").errors.get(&path("x")),
        Some(&FieldError::from("old"))
    );

    form.change("mode", "async").expect("change");
    let state = form.get_state().expect("state");
    assert!(state.validating);
    assert_eq!(state.errors.get(&path("x")), Some(&FieldError::from("old")));

    release
        .send(FormErrors::new().field("y", "new"))
        .expect("release");
    block_on(form.wait_for_validation()).expect("drive validation");
    let state = form.get_state().expect("state");
    assert!(!state.validating);
    assert_eq!(state.errors.get(&path("x")), None);
    assert_eq!(state.errors.get(&path("y")), Some(&FieldError::from("new")));

    form.change("mode", "sync").expect("change");
    let state = form.get_state().expect("state");
    assert_eq!(state.errors.get(&path("x")), Some(&FieldError::from("old")));
    assert_eq!(state.errors.get(&path("y")), None);
}
