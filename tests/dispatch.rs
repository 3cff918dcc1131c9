mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingBot;

use plugbot::application::events::AppEvent;
use plugbot::application::messaging::{
    middleware_fn, Dispatcher, DispatcherConfig, MiddlewareOutcome, PromptAnswer, PromptOptions,
    Session, Validate,
};
use plugbot::domain::entities::{Command, InboundEvent, Sender, Shortcut};
use plugbot::domain::traits::PluginStore;
use plugbot::infrastructure::config::PluginConfig;
use plugbot::infrastructure::storage::MemoryPluginStore;
use plugbot::plugins::{builtin, PluginManager};

struct Harness {
    _dir: tempfile::TempDir,
    app: Arc<Dispatcher>,
    manager: PluginManager,
    bot: Arc<RecordingBot>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = PluginConfig {
        directory: dir.path().join("plugins"),
        packages_dir: dir.path().join("packages"),
        ..PluginConfig::default()
    };
    let app = Dispatcher::new(DispatcherConfig::default());
    let store: Arc<dyn PluginStore> = Arc::new(MemoryPluginStore::new());
    let manager = PluginManager::new(config, app.clone(), Arc::new(builtin::loader()), store);
    assert!(manager.load_from_config().await.is_empty());

    let bot = RecordingBot::new("10001");
    manager.add_bot(bot.clone()).await;
    Harness {
        _dir: dir,
        app,
        manager,
        bot,
    }
}

fn message(content: &str) -> InboundEvent {
    InboundEvent::private_message("10001", "42", content)
}

async fn until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_command_reply_goes_to_channel() {
    let h = harness().await;
    h.app.dispatch(message("/echo hello world")).await;
    h.app.dispatch(message("/say hi")).await;

    assert_eq!(
        h.bot.sent(),
        vec![
            ("private:42".to_string(), "hello world".to_string()),
            ("private:42".to_string(), "hi".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_group_message_replies_to_group() {
    let h = harness().await;
    h.app
        .dispatch(InboundEvent::group_message("10001", "777", "42", "/echo ok"))
        .await;
    assert_eq!(h.bot.sent(), vec![("group:777".to_string(), "ok".to_string())]);
}

#[tokio::test]
async fn test_parse_errors_are_replied() {
    let h = harness().await;
    h.app.register_command(
        Command::new("add <a:integer> <b:integer>")
            .unwrap()
            .with_handler(|action, _session| async move {
                let a = action.arg("a").and_then(|v| v.as_i64()).unwrap_or_default();
                let b = action.arg("b").and_then(|v| v.as_i64()).unwrap_or_default();
                Ok(Some((a + b).to_string()))
            }),
    );

    h.app.dispatch(message("/add 2 40")).await;
    h.app.dispatch(message("/add 2 x")).await;
    h.app.dispatch(message("/echo")).await;

    assert_eq!(
        h.bot.contents(),
        vec![
            "42".to_string(),
            "invalid argument (b): invalid integer (x)".to_string(),
            "missing required argument (message)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_plain_text_is_ignored() {
    let h = harness().await;
    h.app.dispatch(message("just chatting")).await;
    h.app.dispatch(message("/unknown thing")).await;
    assert!(h.bot.sent().is_empty());
}

#[tokio::test]
async fn test_shortcut_and_options() {
    let h = harness().await;
    h.app.register_command(
        Command::new("roll [sides:integer]")
            .unwrap()
            .with_shortcut(Shortcut::Literal("dice".into()))
            .option("loud", "-l, --loud")
            .unwrap()
            .with_handler(|action, _session| async move {
                let sides = action.arg("sides").and_then(|v| v.as_i64()).unwrap_or(6);
                let text = format!("d{}", sides);
                Ok(Some(if action.flag("loud") { text.to_uppercase() } else { text }))
            }),
    );

    h.app.dispatch(message("/roll 20 --loud")).await;
    h.app.dispatch(message("/dice")).await;
    assert_eq!(h.bot.contents(), vec!["D20".to_string(), "d6".to_string()]);
}

#[tokio::test]
async fn test_help_lists_commands() {
    let h = harness().await;
    h.app.dispatch(message("/help")).await;
    h.app.dispatch(message("/help echo")).await;

    let contents = h.bot.contents();
    assert!(contents[0].contains("help [command]"));
    assert!(contents[0].contains("echo <message>"));
    assert_eq!(contents[1], "echo <message>\nRepeat a message");
}

#[tokio::test]
async fn test_prompt_consumes_answer() {
    let h = harness().await;
    h.app.register_command(Command::new("ask").unwrap().with_handler(
        |_action, session: Session| async move {
            let answer = session.prompt("name?", Some(Duration::from_secs(5))).await;
            Ok(Some(format!("hi {}", answer.unwrap_or_default())))
        },
    ));
    let baseline = h.app.middleware_count();

    let asking = {
        let app = h.app.clone();
        tokio::spawn(async move { app.dispatch(message("/ask")).await })
    };
    while h.app.middleware_count() == baseline {
        tokio::task::yield_now().await;
    }
    h.app.dispatch(message("/echo bob")).await;
    asking.await.unwrap();

    assert_eq!(
        h.bot.contents(),
        vec!["name?".to_string(), "hi /echo bob".to_string()]
    );
    assert_eq!(h.app.middleware_count(), baseline);
}

#[tokio::test]
async fn test_prompt_times_out() {
    let h = harness().await;
    h.app.register_command(Command::new("ask").unwrap().with_handler(
        |_action, session: Session| async move {
            let answer = session.prompt("name?", Some(Duration::from_millis(20))).await;
            Ok(Some(answer.unwrap_or_else(|| "timed out".to_string())))
        },
    ));
    h.app.dispatch(message("/ask")).await;
    assert_eq!(h.bot.contents(), vec!["name?".to_string(), "timed out".to_string()]);
}

#[tokio::test]
async fn test_session_middleware_is_channel_scoped() {
    let h = harness().await;
    let session = Session::new(h.app.clone(), h.bot.clone(), message("start"));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = seen.clone();
    let id = session.middleware(middleware_fn(move |s: Session| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(s.content().to_string());
            MiddlewareOutcome::Next
        }
    }));

    h.app.dispatch(message("/echo mine")).await;
    h.app
        .dispatch(InboundEvent::private_message("10001", "43", "/echo other"))
        .await;

    assert_eq!(*seen.lock().unwrap(), vec!["/echo mine".to_string()]);
    assert_eq!(h.bot.contents(), vec!["other".to_string()]);
    assert!(h.app.remove_middleware(id));
}

#[tokio::test]
async fn test_events_are_published() {
    let h = harness().await;
    let mut events = h.app.events().subscribe();

    h.app
        .dispatch(InboundEvent::notice("10001", "group_increase").with_group("777"))
        .await;
    h.app.dispatch(message("hello")).await;

    match events.recv().await.unwrap() {
        AppEvent::Notice(session) => assert_eq!(session.channel_id(), "group_increase:777"),
        other => panic!("unexpected event {:?}", other),
    }
    match events.recv().await.unwrap() {
        AppEvent::Message(session) => assert_eq!(session.content(), "hello"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_reports_each_channel() {
    let h = harness().await;
    let channels = vec!["group:1".parse().unwrap(), "private:2".parse().unwrap()];
    let results = h.app.broadcast("10001", &channels, "news").await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.bot.sent().len(), 2);

    let results = h.app.broadcast("99999", &channels, "news").await;
    assert!(results.iter().all(|r| r.is_err()));
}

#[tokio::test]
async fn test_disabled_plugin_stops_answering() {
    let h = harness().await;
    h.manager.disable("echo", "10001").await.unwrap();

    h.app.dispatch(message("/echo still here")).await;
    h.app.dispatch(message("/help echo")).await;
    h.app.dispatch(message("/help")).await;
    let contents = h.bot.contents();
    assert_eq!(contents.len(), 2);
    assert!(contents[0].contains("unknown command echo"));
    assert!(!contents[1].contains("echo <message>"));
    assert!(contents[1].contains("help [command]"));

    h.manager.enable("echo", h.bot.clone()).await.unwrap();
    h.app.dispatch(message("/echo back")).await;
    assert_eq!(h.bot.contents().last().map(String::as_str), Some("back"));
}

#[tokio::test]
async fn test_ask_repeats_until_answer_is_valid() {
    let h = harness().await;
    h.app.register_command(Command::new("age").unwrap().with_handler(
        |_action, session: Session| async move {
            let options = PromptOptions::text("age", "age?")
                .validate(Validate::Pattern(regex_lite::Regex::new(r"^\d+$").unwrap()))
                .error_message("digits only")
                .timeout(Duration::from_secs(5));
            let answer = session.ask(&options).await;
            let age = answer.and_then(|a| a.as_text().map(String::from));
            Ok(Some(format!("age {}", age.unwrap_or_default())))
        },
    ));
    let baseline = h.app.middleware_count();

    let asking = {
        let app = h.app.clone();
        tokio::spawn(async move { app.dispatch(message("/age")).await })
    };
    until(|| h.app.middleware_count() > baseline).await;
    h.app.dispatch(message("old")).await;
    until(|| h.bot.contents().len() == 2 && h.app.middleware_count() > baseline).await;
    h.app.dispatch(message("31")).await;
    asking.await.unwrap();

    assert_eq!(
        h.bot.contents(),
        vec!["age?".to_string(), "digits only".to_string(), "age 31".to_string()]
    );
    assert_eq!(h.app.middleware_count(), baseline);
}

#[tokio::test]
async fn test_ask_gives_up_after_total_timeout() {
    let h = harness().await;
    h.app.register_command(Command::new("pick").unwrap().with_handler(
        |_action, session: Session| async move {
            let options = PromptOptions::select("color", "color?", ["red", "green"])
                .timeout(Duration::from_millis(30));
            Ok(Some(match session.ask(&options).await {
                Some(answer) => format!("{:?}", answer),
                None => "timed out".to_string(),
            }))
        },
    ));
    let baseline = h.app.middleware_count();

    let asking = {
        let app = h.app.clone();
        tokio::spawn(async move { app.dispatch(message("/pick")).await })
    };
    until(|| h.app.middleware_count() > baseline).await;
    h.app.dispatch(message("blue")).await;
    asking.await.unwrap();

    assert_eq!(
        h.bot.contents(),
        vec![
            "color?\n1. red\n2. green".to_string(),
            "invalid answer, try again".to_string(),
            "timed out".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_prompt_all_collects_named_answers() {
    let h = harness().await;
    let session = Session::new(h.app.clone(), h.bot.clone(), message("start"));
    let baseline = h.app.middleware_count();

    let asking = tokio::spawn(async move {
        session
            .prompt_all(&[
                PromptOptions::text("name", "name?"),
                PromptOptions::multiple_select("tags", "tags?", ["a", "b", "c"]),
            ])
            .await
    });
    until(|| h.app.middleware_count() > baseline).await;
    h.app.dispatch(message("ann")).await;
    until(|| h.bot.contents().len() == 2 && h.app.middleware_count() > baseline).await;
    h.app.dispatch(message("3 1")).await;

    let answers = asking.await.unwrap().unwrap();
    assert_eq!(answers["name"], PromptAnswer::Text("ann".to_string()));
    assert_eq!(
        answers["tags"],
        PromptAnswer::Choices(vec!["c".to_string(), "a".to_string()])
    );
}

#[tokio::test]
async fn test_execute_template_expands_nested_commands() {
    let h = harness().await;
    h.app.register_command(
        Command::new("upper <text:text>")
            .unwrap()
            .with_handler(|action, _session| async move {
                Ok(action.arg("text").map(|v| v.to_string().to_uppercase()))
            }),
    );
    let event = message("start").with_sender(Sender::new("42").with_nickname("ann"));
    let session = Session::new(h.app.clone(), h.bot.clone(), event);

    assert_eq!(
        session.execute_template("echo $(upper $(echo $s)) from $m").await,
        "ANN from @10001"
    );
    assert_eq!(session.execute_template("hello $a, $(upper x)").await, "hello @42, X");
    assert_eq!(session.execute_template("$(nothing here)").await, "nothing here");
    assert!(h.bot.sent().is_empty());
}
