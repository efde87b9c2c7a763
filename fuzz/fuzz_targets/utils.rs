use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

pub const MAX_INPUT_SIZE: usize = 256 * 1024;

pub const TIMEOUT: Duration = Duration::from_secs(1);

pub fn cap(data: &[u8]) -> &[u8] {
    &data[..data.len().min(MAX_INPUT_SIZE)]
}

/// Runs one fuzz body per input on a dedicated worker thread so a hang shows
/// up as a panic instead of a stuck fuzzer.
pub struct Runner {
    input_tx: mpsc::SyncSender<Vec<u8>>,
    output_rx: Mutex<mpsc::Receiver<()>>,
}

impl Runner {
    pub fn get(cell: &'static OnceLock<Runner>, name: &str, body: fn(&[u8])) -> &'static Runner {
        cell.get_or_init(|| {
            let (input_tx, input_rx) = mpsc::sync_channel::<Vec<u8>>(0);
            let (output_tx, output_rx) = mpsc::sync_channel::<()>(0);

            std::thread::Builder::new()
                .name(name.to_owned())
                .spawn(move || {
                    for input in input_rx {
                        body(&input);
                        let _ = output_tx.send(());
                    }
                })
                .expect("spawn fuzz worker");

            Runner {
                input_tx,
                output_rx: Mutex::new(output_rx),
            }
        })
    }

    pub fn run(&self, data: &[u8]) {
        self.input_tx
            .send(cap(data).to_vec())
            .expect("fuzz worker died");
        let rx = self.output_rx.lock().expect("fuzz runner poisoned");
        match rx.recv_timeout(TIMEOUT) {
            Ok(()) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => panic!("fuzz target timed out"),
            Err(mpsc::RecvTimeoutError::Disconnected) => panic!("fuzz worker terminated"),
        }
    }
}
