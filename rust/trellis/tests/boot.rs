//! Plugin loading order, metadata checks, hooks and boot failures.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use testresult::TestResult;
use trellis::{
    App, BootError, BoxError, Decorator, ErrorCode, FnPlugin, Instance, Options, Phase,
    RegisterError, Registration, plugin,
};

type Log = Arc<Mutex<Vec<String>>>;

/// A named plugin that appends its name to `log` when its body runs.
fn logging(log: &Log, name: &'static str) -> FnPlugin {
    let log = log.clone();
    plugin(move |_, _| {
        let log = log.clone();
        async move {
            log.lock().push(name.to_string());
            Ok(())
        }
    })
    .named(name)
}

#[test_log::test(tokio::test)]
async fn plugins_load_depth_first_in_registration_order() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();

    let outer = log.clone();
    app.register(
        plugin(move |instance, _| {
            let log = outer.clone();
            async move {
                log.lock().push("a".into());
                instance.register(logging(&log, "a1"), Value::Null)?;
                instance.register(logging(&log, "a2"), Value::Null)?;
                Ok(())
            }
        })
        .named("a"),
        Value::Null,
    )?;
    app.register(logging(&log, "b"), Value::Null)?;

    app.ready().await?;
    assert_eq!(*log.lock(), vec!["a", "a1", "a2", "b"]);
    assert_eq!(app.phase(), Phase::Ready);
    Ok(())
}

#[tokio::test]
async fn plugins_receive_their_options() -> TestResult {
    let app = App::default();
    let seen: Arc<Mutex<Value>> = Arc::default();

    let sink = seen.clone();
    app.register(
        plugin(move |_, options| {
            let sink = sink.clone();
            async move {
                *sink.lock() = options;
                Ok(())
            }
        }),
        json!({ "prefix": "/v1" }),
    )?;

    app.ready().await?;
    assert_eq!(*seen.lock(), json!({ "prefix": "/v1" }));
    Ok(())
}

#[tokio::test]
async fn an_after_hook_sees_what_an_unencapsulated_plugin_declared() -> TestResult {
    let app = App::default();
    let seen: Arc<Mutex<Option<(bool, bool)>>> = Arc::default();

    let sink = seen.clone();
    app.register(
        plugin(|instance, _| async move {
            instance.decorate("test", Decorator::value(()))?;
            Ok(())
        })
        .skip_override(),
        Value::Null,
    )?
    .after(move |error, instance| {
        let sink = sink.clone();
        async move {
            *sink.lock() = Some((error.is_none(), instance.has_decorator("test")));
            Ok(())
        }
    })?;

    app.ready().await?;
    assert_eq!(*seen.lock(), Some((true, true)));
    assert!(app.has_decorator("test"));
    Ok(())
}

#[tokio::test]
async fn decorations_made_in_a_hook_reach_later_siblings() -> TestResult {
    let app = App::default();
    let seen: Arc<Mutex<Option<bool>>> = Arc::default();

    app.register(plugin(|_, _| async { Ok(()) }).named("first"), Value::Null)?
        .after(|_, instance| async move {
            instance.decorate("staged", Decorator::value(()))?;
            Ok(())
        })?;

    let sink = seen.clone();
    app.register(
        plugin(move |instance, _| {
            let sink = sink.clone();
            async move {
                *sink.lock() = Some(instance.has_decorator("staged"));
                Ok(())
            }
        }),
        Value::Null,
    )?;

    app.ready().await?;
    assert_eq!(*seen.lock(), Some(true));
    Ok(())
}

#[tokio::test]
async fn standalone_hooks_run_after_everything_registered_before_them() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();

    app.register(logging(&log, "a"), Value::Null)?;
    let sink = log.clone();
    app.after(move |_, _| {
        let sink = sink.clone();
        async move {
            sink.lock().push("hook".into());
            Ok(())
        }
    })?;
    app.register(logging(&log, "b"), Value::Null)?;

    app.ready().await?;
    assert_eq!(*log.lock(), vec!["a", "hook", "b"]);
    Ok(())
}

#[tokio::test]
async fn dependencies_are_loaded_first() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();

    app.register(logging(&log, "a").depends_on("c"), Value::Null)?;
    app.register(logging(&log, "b"), Value::Null)?;
    app.register(logging(&log, "c"), Value::Null)?;

    app.ready().await?;
    assert_eq!(*log.lock(), vec!["b", "c", "a"]);
    Ok(())
}

#[tokio::test]
async fn an_unknown_plugin_dependency_aborts_boot() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    app.register(logging(&log, "a").depends_on("ghost"), Value::Null)?;

    let error = app.ready().await.unwrap_err();
    assert!(matches!(
        error,
        BootError::MissingPlugin { ref plugin, ref dependency } if plugin == "a" && dependency == "ghost"
    ));
    assert_eq!(error.code(), ErrorCode::PluginMissingDependency);
    assert!(log.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_dependency_cycle_aborts_boot() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    app.register(logging(&log, "a").depends_on("b"), Value::Null)?;
    app.register(logging(&log, "b").depends_on("a"), Value::Null)?;

    let error = app.ready().await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::PluginDependencyCycle);
    assert!(log.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_missing_required_decorator_aborts_boot() -> TestResult {
    let app = App::default();
    app.register(
        plugin(|_, _| async { Ok(()) })
            .named("needs-foo")
            .requires_request_decorator("foo"),
        Value::Null,
    )?;

    let error = app.ready().await.unwrap_err();
    assert_eq!(error.to_string(), "The decorator 'foo' is not present in Request");
    assert_eq!(error.code(), ErrorCode::PluginMissingDecorator);
    assert_eq!(app.phase(), Phase::Constructing);

    // The outcome is settled once.
    let again = app.ready().await.unwrap_err();
    assert_eq!(again.to_string(), error.to_string());
    Ok(())
}

#[tokio::test]
async fn required_decorators_may_come_from_ancestors() -> TestResult {
    let app = App::default();
    app.decorate("db", Decorator::value(()))?;
    app.decorate_reply("view", Decorator::value(()))?;
    app.register(
        plugin(|_, _| async { Ok(()) })
            .requires_decorator("db")
            .requires_reply_decorator("view"),
        Value::Null,
    )?;

    app.ready().await?;
    Ok(())
}

#[tokio::test]
async fn a_failing_plugin_aborts_boot() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    app.register(
        plugin(|instance, _| async move {
            instance.decorate_with_dependencies("x", Decorator::value(()), ["nope"])?;
            Ok(())
        })
        .named("broken"),
        Value::Null,
    )?;
    app.register(logging(&log, "never"), Value::Null)?;

    let error = app.ready().await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::PluginFailed);
    assert_eq!(
        error.decorate_error().map(|error| error.code()),
        Some(ErrorCode::DecMissingDependency)
    );
    assert!(log.lock().is_empty());
    assert_eq!(app.phase(), Phase::Constructing);
    Ok(())
}

#[tokio::test]
async fn an_after_hook_can_recover_a_failure() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    let seen: Arc<Mutex<Option<ErrorCode>>> = Arc::default();

    let sink = seen.clone();
    app.register(
        plugin(|_, _| async { Err::<(), BoxError>("boom".into()) }).named("flaky"),
        Value::Null,
    )?
    .after(move |error, _| {
        let sink = sink.clone();
        async move {
            *sink.lock() = error.map(|error| error.code());
            Ok(())
        }
    })?;
    app.register(logging(&log, "next"), Value::Null)?;

    app.ready().await?;
    assert_eq!(*seen.lock(), Some(ErrorCode::PluginFailed));
    assert_eq!(*log.lock(), vec!["next"]);
    Ok(())
}

#[tokio::test]
async fn an_after_hook_can_hand_the_failure_back() -> TestResult {
    let app = App::default();
    app.register(
        plugin(|_, _| async { Ok(()) })
            .named("needs-db")
            .requires_decorator("db"),
        Value::Null,
    )?
    .after(|error, _| async move {
        match error {
            Some(error) => Err(Box::new(error) as BoxError),
            None => Ok(()),
        }
    })?;

    let error = app.ready().await.unwrap_err();
    assert!(matches!(error, BootError::MissingDecorator { ref name, .. } if name == "db"));
    Ok(())
}

#[tokio::test]
async fn a_standalone_hook_receives_the_failure_in_front_of_it() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    let seen: Arc<Mutex<Vec<Option<ErrorCode>>>> = Arc::default();

    app.register(
        plugin(|_, _| async { Err::<(), BoxError>("boom".into()) }).named("flaky"),
        Value::Null,
    )?;
    for recover in [false, true] {
        let sink = seen.clone();
        app.after(move |error, _| {
            let sink = sink.clone();
            async move {
                sink.lock().push(error.as_ref().map(BootError::code));
                match error {
                    Some(error) if !recover => Err(Box::new(error) as BoxError),
                    _ => Ok(()),
                }
            }
        })?;
    }
    app.register(logging(&log, "next"), Value::Null)?;

    app.ready().await?;
    assert_eq!(
        *seen.lock(),
        vec![Some(ErrorCode::PluginFailed), Some(ErrorCode::PluginFailed)]
    );
    assert_eq!(*log.lock(), vec!["next"]);
    Ok(())
}

#[tokio::test]
async fn an_unrecovered_failure_stops_at_the_next_plugin() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();

    app.register(
        plugin(|_, _| async { Err::<(), BoxError>("boom".into()) }).named("flaky"),
        Value::Null,
    )?;
    app.after(|error, _| async move {
        match error {
            Some(error) => Err(Box::new(error) as BoxError),
            None => Ok(()),
        }
    })?;
    app.register(logging(&log, "never"), Value::Null)?;

    let error = app.ready().await.unwrap_err();
    assert!(matches!(error, BootError::Plugin { ref plugin, .. } if plugin == "flaky"));
    assert!(log.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn a_late_attached_hook_is_refused() -> TestResult {
    let app = App::default();
    let registration = app.register(plugin(|_, _| async { Ok(()) }), Value::Null)?;
    app.ready().await?;

    let error = registration.after(|_, _| async { Ok(()) }).unwrap_err();
    assert_eq!(
        error,
        RegisterError::AfterStart {
            what: "after hook".into()
        }
    );
    Ok(())
}

#[tokio::test]
async fn attaching_a_hook_to_a_drained_scope_is_refused() -> TestResult {
    let app = App::default();
    let stash: Arc<Mutex<Option<Registration>>> = Arc::default();
    let outcome: Arc<Mutex<Option<RegisterError>>> = Arc::default();

    let sink = stash.clone();
    app.register(
        plugin(move |instance, _| {
            let sink = sink.clone();
            async move {
                let nested = instance.register(plugin(|_, _| async { Ok(()) }), Value::Null)?;
                *sink.lock() = Some(nested);
                Ok(())
            }
        }),
        Value::Null,
    )?;

    let (source, sink) = (stash.clone(), outcome.clone());
    app.register(
        plugin(move |_, _| {
            let (source, sink) = (source.clone(), sink.clone());
            async move {
                let nested = source.lock().take();
                if let Some(nested) = nested {
                    *sink.lock() = nested.after(|_, _| async { Ok(()) }).err();
                }
                Ok(())
            }
        }),
        Value::Null,
    )?;

    app.ready().await?;
    assert_eq!(
        *outcome.lock(),
        Some(RegisterError::ScopeLoaded {
            what: "after hook".into()
        })
    );
    Ok(())
}

#[tokio::test]
async fn waiting_for_ready_from_inside_the_boot_is_refused() -> TestResult {
    let app = App::default();
    let seen: Arc<Mutex<Option<ErrorCode>>> = Arc::default();

    let (handle, sink) = (app.clone(), seen.clone());
    app.register(
        plugin(move |_, _| {
            let (handle, sink) = (handle.clone(), sink.clone());
            async move {
                *sink.lock() = handle.ready().await.err().map(|error| error.code());
                Ok(())
            }
        }),
        Value::Null,
    )?;

    app.ready().await?;
    assert_eq!(*seen.lock(), Some(ErrorCode::BootReentered));

    // Other applications can still be booted from inside a plugin.
    let outer = App::default();
    let inner = App::default();
    let sink = seen.clone();
    outer.register(
        plugin(move |_, _| {
            let (inner, sink) = (inner.clone(), sink.clone());
            async move {
                *sink.lock() = inner.ready().await.err().map(|error| error.code());
                Ok(())
            }
        }),
        Value::Null,
    )?;
    outer.ready().await?;
    assert_eq!(*seen.lock(), None);
    Ok(())
}

#[tokio::test]
async fn a_failing_hook_aborts_boot() -> TestResult {
    let app = App::default();
    app.after(|_, _| async { Err::<(), BoxError>("hook failed".into()) })?;

    let error = app.ready().await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::HookFailed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn a_slow_plugin_times_out() -> TestResult {
    let app = App::new(Options::default().with_plugin_timeout(Duration::from_millis(100)));
    app.register(
        plugin(|_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .named("slow"),
        Value::Null,
    )?;

    let error = app.ready().await.unwrap_err();
    assert!(matches!(
        error,
        BootError::Timeout { ref plugin, timeout } if plugin == "slow" && timeout == Duration::from_millis(100)
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn a_zero_timeout_waits_indefinitely() -> TestResult {
    let app = App::new(Options::default().with_plugin_timeout(Duration::ZERO));
    app.register(
        plugin(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }),
        Value::Null,
    )?;

    app.ready().await?;
    Ok(())
}

#[tokio::test]
async fn registering_into_a_loaded_scope_is_refused() -> TestResult {
    let app = App::default();
    let stash: Arc<Mutex<Option<Instance>>> = Arc::default();
    let outcome: Arc<Mutex<Option<Result<(), RegisterError>>>> = Arc::default();

    let sink = stash.clone();
    app.register(
        plugin(move |instance, _| {
            let sink = sink.clone();
            async move {
                *sink.lock() = Some(instance);
                Ok(())
            }
        })
        .named("early"),
        Value::Null,
    )?;

    let (source, sink) = (stash.clone(), outcome.clone());
    app.register(
        plugin(move |_, _| {
            let (source, sink) = (source.clone(), sink.clone());
            async move {
                let early = source.lock().take();
                if let Some(early) = early {
                    let result = early
                        .register(plugin(|_, _| async { Ok(()) }).named("late"), Value::Null)
                        .map(|_| ());
                    *sink.lock() = Some(result);
                }
                Ok(())
            }
        }),
        Value::Null,
    )?;

    app.ready().await?;
    assert_eq!(
        *outcome.lock(),
        Some(Err(RegisterError::ScopeLoaded {
            what: "late".into()
        }))
    );
    Ok(())
}

#[tokio::test]
async fn ready_is_idempotent() -> TestResult {
    let app = App::default();
    let log: Log = Arc::default();
    app.register(logging(&log, "once"), Value::Null)?;

    let (first, second) = tokio::join!(app.ready(), app.ready());
    first?;
    second?;
    app.ready().await?;
    assert_eq!(*log.lock(), vec!["once"]);
    Ok(())
}
