mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::RecordingBot;
use tempfile::TempDir;

use plugbot::application::errors::PluginError;
use plugbot::application::events::AppEvent;
use plugbot::application::messaging::{Dispatcher, DispatcherConfig};
use plugbot::domain::entities::Command;
use plugbot::domain::traits::{Bot, PluginStore};
use plugbot::infrastructure::config::PluginConfig;
use plugbot::infrastructure::plugins::PluginLoader;
use plugbot::infrastructure::storage::MemoryPluginStore;
use plugbot::plugins::{builtin, ExportTable, PluginKind, PluginManager, SourceLocator};

struct Fixture {
    dir: TempDir,
    app: Arc<Dispatcher>,
    store: Arc<MemoryPluginStore>,
    manager: PluginManager,
}

fn fixture_with(loader: PluginLoader) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = PluginConfig {
        directory: dir.path().join("plugins"),
        packages_dir: dir.path().join("packages"),
        data_dir: dir.path().join("data"),
        ..PluginConfig::default()
    };
    std::fs::create_dir_all(&config.directory).unwrap();
    std::fs::create_dir_all(&config.packages_dir).unwrap();

    let app = Dispatcher::new(DispatcherConfig::default());
    let store = Arc::new(MemoryPluginStore::new());
    let manager = PluginManager::new(config, app.clone(), Arc::new(loader), store.clone());
    Fixture {
        dir,
        app,
        store,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(builtin::loader())
}

fn noop_plugin() -> ExportTable {
    ExportTable::new().on_install(|_ctx, _config| async { Ok(()) })
}

fn write_manifest(dir: &std::path::Path, name: &str, description: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("plugin.yaml"),
        format!("name: {}\nversion: 1.0.0\ndescription: {}\n", name, description),
    )
    .unwrap();
}

#[tokio::test]
async fn test_enable_twice_and_disable_unbound() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    f.manager
        .install(f.manager.inline("greeter", noop_plugin()), serde_json::Value::Null)
        .await
        .unwrap();

    f.manager.enable("greeter", bot.clone()).await.unwrap();
    let err = f.manager.enable("greeter", bot.clone()).await.unwrap_err();
    assert_eq!(
        err,
        PluginError::AlreadyEnabled {
            plugin: "greeter".into(),
            bot: "10001".into()
        }
    );
    assert_eq!(f.store.load("10001").await, vec!["greeter"]);

    f.manager.disable("greeter", "10001").await.unwrap();
    let err = f.manager.disable("greeter", "10001").await.unwrap_err();
    assert!(matches!(err, PluginError::NotEnabled { .. }));
    assert!(f.store.load("10001").await.is_empty());
}

#[tokio::test]
async fn test_failing_enable_hook_leaves_plugin_unbound() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    let exports = noop_plugin().on_enable(|_bot| async { Err("no database".to_string()) });
    f.manager
        .install(f.manager.inline("fragile", exports), serde_json::Value::Null)
        .await
        .unwrap();

    let err = f.manager.enable("fragile", bot).await.unwrap_err();
    assert!(matches!(err, PluginError::Hook { hook: "enable", .. }));
    let plugin = f.manager.check_install("fragile").unwrap();
    assert!(plugin.bound_ids().is_empty());
    assert!(f.store.load("10001").await.is_empty());
}

#[tokio::test]
async fn test_failing_disable_hook_still_unbinds() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    let exports = noop_plugin().on_disable(|_bot| async { Err("already closed".to_string()) });
    f.manager
        .install(f.manager.inline("sticky", exports), serde_json::Value::Null)
        .await
        .unwrap();
    f.manager.enable("sticky", bot).await.unwrap();

    f.manager.disable("sticky", "10001").await.unwrap();
    assert!(!f.manager.check_install("sticky").unwrap().is_enabled_for("10001"));
}

#[tokio::test]
async fn test_install_errors() {
    let f = fixture();

    let err = f
        .manager
        .install(f.manager.inline("hollow", ExportTable::new()), serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PluginError::MissingHook {
            plugin: "hollow".into(),
            hook: "install"
        }
    );

    let half = ExportTable::new().on_install(|ctx, _config| async move {
        ctx.command(Command::new("half").unwrap());
        Err("config missing".to_string())
    });
    let err = f
        .manager
        .install(f.manager.inline("half", half), serde_json::Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Hook { hook: "install", .. }));
    assert!(f.app.find_command("half", "half").is_none());
    assert!(f.manager.check_install("half").is_err());

    f.manager
        .install(f.manager.inline("once", noop_plugin()), serde_json::Value::Null)
        .await
        .unwrap();
    let err = f
        .manager
        .install(f.manager.inline("once", noop_plugin()), serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err, PluginError::AlreadyInstalled("once".into()));

    let err = f
        .manager
        .install_by_name("nowhere", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err, PluginError::NotFound("nowhere".into()));
}

#[tokio::test]
async fn test_uninstall_drops_bindings_and_registrations() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    let uninstalled = Arc::new(AtomicUsize::new(0));
    let counter = uninstalled.clone();
    let exports = ExportTable::new()
        .on_install(|ctx, _config| async move {
            ctx.command(Command::new("weather <city>").unwrap());
            Ok(())
        })
        .on_uninstall(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    f.manager
        .install(f.manager.inline("weather", exports), serde_json::Value::Null)
        .await
        .unwrap();
    f.manager.enable("weather", bot).await.unwrap();
    assert!(f.app.find_command("weather", "weather oslo").is_some());

    f.manager.uninstall("weather").await.unwrap();
    assert_eq!(uninstalled.load(Ordering::SeqCst), 1);
    assert!(f.app.find_command("weather", "weather oslo").is_none());
    assert!(f.store.load("10001").await.is_empty());
    assert_eq!(
        f.manager.check_install("weather").unwrap_err(),
        PluginError::NotInstalled("weather".into())
    );
    assert_eq!(
        f.manager.uninstall("weather").await.unwrap_err(),
        PluginError::NotInstalled("weather".into())
    );
}

static RELOADS: AtomicUsize = AtomicUsize::new(0);
static RELOAD_ENABLES: AtomicUsize = AtomicUsize::new(0);

fn reloadable() -> ExportTable {
    RELOADS.fetch_add(1, Ordering::SeqCst);
    ExportTable::new()
        .on_install(|ctx, _config| async move {
            ctx.command(
                Command::new("ping")
                    .unwrap()
                    .with_handler(|_action, _session| async { Ok(Some("pong".to_string())) }),
            );
            Ok(())
        })
        .on_enable(|_bot| async {
            RELOAD_ENABLES.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
}

#[tokio::test]
async fn test_restart_reloads_module_and_keeps_bindings() {
    let f = fixture_with(PluginLoader::new().with_builtin("reloadable", reloadable));
    let first = RecordingBot::new("10001");
    let second = RecordingBot::new("10002");

    f.manager
        .install_by_name("reloadable", serde_json::json!({"interval": 5}))
        .await
        .unwrap();
    assert_eq!(RELOADS.load(Ordering::SeqCst), 1);
    f.manager.enable("reloadable", first).await.unwrap();
    f.manager.enable("reloadable", second).await.unwrap();
    assert_eq!(RELOAD_ENABLES.load(Ordering::SeqCst), 2);

    f.manager.restart("reloadable").await.unwrap();

    assert_eq!(RELOADS.load(Ordering::SeqCst), 2);
    assert_eq!(RELOAD_ENABLES.load(Ordering::SeqCst), 4);
    let plugin = f.manager.check_install("reloadable").unwrap();
    assert_eq!(plugin.bound_ids(), vec!["10001", "10002"]);
    assert_eq!(plugin.config(), serde_json::json!({"interval": 5}));
    assert!(f.app.find_command("ping", "ping").is_some());
    assert_eq!(f.store.load("10001").await, vec!["reloadable"]);
}

#[tokio::test]
async fn test_failed_restart_is_restart_error() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let exports = ExportTable::new().on_install(move |ctx, _config| {
        let counter = counter.clone();
        async move {
            ctx.command(
                Command::new("serve")
                    .unwrap()
                    .with_handler(|_action, _session| async { Ok(Some("serving".to_string())) }),
            );
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err("port in use".to_string())
            }
        }
    });
    f.manager
        .install(f.manager.inline("server", exports), serde_json::Value::Null)
        .await
        .unwrap();
    f.manager.enable("server", bot).await.unwrap();
    let mut events = f.app.events().subscribe();

    let err = f.manager.restart("server").await.unwrap_err();
    assert!(matches!(err, PluginError::Restart { ref plugin, .. } if plugin == "server"));

    assert_eq!(
        f.manager.check_install("server").unwrap_err(),
        PluginError::NotInstalled("server".into())
    );
    assert!(f.app.find_command("serve", "serve").is_none());
    assert!(f.manager.list_all().iter().all(|d| d.name != "server"));
    assert_eq!(f.store.load("10001").await, vec!["server"]);

    let mut uninstalled = false;
    while let Ok(event) = events.try_recv() {
        uninstalled |= matches!(event, AppEvent::PluginUninstalled(ref name) if name == "server");
    }
    assert!(uninstalled);
}

fn pinger() -> ExportTable {
    ExportTable::new().on_install(|ctx, _config| async move {
        ctx.command(
            Command::new("ping")
                .unwrap()
                .with_handler(|_action, _session| async { Ok(Some("pong".to_string())) }),
        );
        Ok(())
    })
}

#[tokio::test]
async fn test_restart_keeps_old_module_until_registrations_drop() {
    let f = fixture_with(PluginLoader::new().with_builtin("pinger", pinger));
    f.manager
        .install_by_name("pinger", serde_json::Value::Null)
        .await
        .unwrap();
    let plugin = f.manager.check_install("pinger").unwrap();
    let old = Arc::downgrade(&plugin.module().unwrap());
    let in_flight = f.app.find_command("ping", "ping").unwrap();

    f.manager.restart("pinger").await.unwrap();

    let current = plugin.module().unwrap();
    let previous = old.upgrade().expect("old module unloaded while its command was held");
    assert!(!Arc::ptr_eq(&current, &previous));
    drop(previous);
    drop(in_flight);
    assert!(old.upgrade().is_none());
    assert!(f.app.find_command("ping", "ping").is_some());
}

#[tokio::test]
async fn test_resolve_order() {
    let f = fixture();
    let plugins = f.dir.path().join("plugins");
    let packages = f.dir.path().join("packages");

    assert_eq!(
        f.manager.resolve("echo").unwrap().kind,
        PluginKind::Builtin
    );
    std::fs::create_dir_all(plugins.join("echo")).unwrap();
    assert_eq!(
        f.manager.resolve("echo").unwrap().kind,
        PluginKind::Builtin
    );
    write_manifest(&plugins.join("echo"), "echo", "Local echo");
    let custom = f.manager.resolve("echo").unwrap();
    assert_eq!(custom.kind, PluginKind::Custom);
    assert_eq!(custom.locator, SourceLocator::Path(plugins.join("echo")));

    std::fs::create_dir_all(packages.join("plugbot-plugin-dice")).unwrap();
    let community = f.manager.resolve("dice").unwrap();
    assert_eq!(community.kind, PluginKind::Community);
    assert_eq!(community.full_name, "plugbot-plugin-dice");

    std::fs::create_dir_all(packages.join("@plugbot").join("plugin-dice")).unwrap();
    let official = f.manager.resolve("dice").unwrap();
    assert_eq!(official.kind, PluginKind::Official);
    assert_eq!(official.full_name, "@plugbot/plugin-dice");

    assert_eq!(
        f.manager.resolve("nope").unwrap_err(),
        PluginError::NotFound("nope".into())
    );
}

#[tokio::test]
async fn test_restore_isolates_failures() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    f.manager.load_from_config().await;
    f.store.add("10001", "missing").await.unwrap();
    f.store.add("10001", "echo").await.unwrap();

    let restored = f.manager.restore(bot.clone()).await;
    assert_eq!(restored, vec!["echo"]);
    assert!(f.manager.check_install("echo").unwrap().is_enabled_for("10001"));
}

#[tokio::test]
async fn test_add_bot_enables_builtins_and_remove_keeps_persisted_set() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    f.manager.load_from_config().await;

    f.manager.add_bot(bot.clone()).await;
    for name in ["command-parser", "echo"] {
        assert!(f.manager.check_install(name).unwrap().is_enabled_for("10001"));
    }

    f.manager.remove_bot(bot.self_id()).await;
    assert!(f.app.bot("10001").is_none());
    assert!(!f.manager.check_install("echo").unwrap().is_enabled_for("10001"));
    assert_eq!(f.store.load("10001").await, vec!["command-parser", "echo"]);
}

#[tokio::test]
async fn test_list_all_deduplicates_and_annotates() {
    let f = fixture();
    let bot = RecordingBot::new("10001");
    let plugins = f.dir.path().join("plugins");
    let packages = f.dir.path().join("packages");

    write_manifest(&plugins.join("echo"), "echo", "Local echo");
    write_manifest(&plugins.join("weather"), "weather", "Forecasts");
    std::fs::create_dir_all(plugins.join("scratch")).unwrap();
    write_manifest(&packages.join("@plugbot").join("plugin-weather"), "weather", "Official forecasts");
    write_manifest(&packages.join("plugbot-plugin-dice"), "dice", "Rolls dice");

    f.manager
        .install(f.manager.inline("inline-only", noop_plugin()), serde_json::Value::Null)
        .await
        .unwrap();
    f.manager.enable("inline-only", bot).await.unwrap();

    let listing = f.manager.list_all();
    let names: Vec<&str> = listing.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["command-parser", "echo", "weather", "dice", "inline-only"]);

    assert_eq!(listing[1].kind, PluginKind::Builtin);
    assert_eq!(listing[2].kind, PluginKind::Custom);
    assert_eq!(listing[2].description.as_deref(), Some("Forecasts"));
    assert_eq!(listing[3].kind, PluginKind::Community);
    assert_eq!(listing[3].full_name, "plugbot-plugin-dice");

    let inline = &listing[4];
    assert_eq!(inline.kind, PluginKind::Inline);
    assert!(inline.installed);
    assert_eq!(inline.binds, vec!["10001"]);
    assert!(!listing[0].installed);
}
