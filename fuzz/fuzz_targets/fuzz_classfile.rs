#![no_main]

mod utils;

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use utils::Runner;

static RUNNER: OnceLock<Runner> = OnceLock::new();

fn parse(data: &[u8]) {
    let Ok(class) = leap_classfile::ClassFile::parse(data) else {
        return;
    };
    for method in &class.methods {
        if let Some(code) = &method.code {
            let _ = leap_classfile::decode_method(code);
        }
    }
}

fuzz_target!(|data: &[u8]| {
    Runner::get(&RUNNER, "fuzz_classfile", parse).run(data);
});
