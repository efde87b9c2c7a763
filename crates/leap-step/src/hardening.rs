use std::sync::Once;

use leap_config::LeapConfig;

static PANIC_HOOK: Once = Once::new();

/// Initializes structured logging and installs a global panic hook that
/// records panics through `tracing`.
///
/// Manager commands still isolate panics with `catch_unwind`; the hook makes
/// sure the ones that escape elsewhere end up in the log. Returns whether this
/// call installed the global subscriber.
pub fn init(config: &LeapConfig) -> bool {
    let installed = leap_config::init_tracing(&config.logging);
    install_panic_hook();
    installed
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            tracing::error!(
                target: "leap.panic",
                thread = thread.name().unwrap_or("<unnamed>"),
                location = %info.location().map(|loc| loc.to_string()).unwrap_or_default(),
                message = %panic_message(info),
                "panic"
            );
            previous(info);
        }));
    });
}

fn panic_message(info: &std::panic::PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload (non-string)".to_owned()
    }
}
