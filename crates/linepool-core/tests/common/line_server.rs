//! Scripted line server for integration tests.
//!
//! Accepts connections on a background thread and answers every request
//! line through a handler, which may reply, stay silent, or hang up.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub enum Answer {
    Line(String),
    Silent,
    Hangup,
}

impl Answer {
    pub fn ok() -> Self {
        Answer::Line("OK".to_string())
    }
}

/// What the server observed.
#[derive(Debug, Default)]
pub struct Observed {
    pub connections: AtomicUsize,
    pub lines: Mutex<Vec<String>>,
}

impl Observed {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

/// Starts a server; `handler(connection_index, line)` decides each answer.
/// Returns the `host:port` address and the shared observations. The server
/// runs until the process exits.
pub fn start<F>(handler: F) -> (String, Arc<Observed>)
where
    F: Fn(usize, &str) -> Answer + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().unwrap().to_string();
    let observed = Arc::new(Observed::default());
    let handler = Arc::new(handler);
    let obs = Arc::clone(&observed);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let index = obs.connections.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let obs = Arc::clone(&obs);
            thread::spawn(move || serve(stream, index, handler.as_ref(), &obs));
        }
    });
    (addr, observed)
}

fn serve<F>(stream: TcpStream, index: usize, handler: &F, observed: &Observed)
where
    F: Fn(usize, &str) -> Answer,
{
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => return,
        };
        observed.lines.lock().unwrap().push(line.clone());
        match handler(index, &line) {
            Answer::Line(reply) => {
                if writer.write_all(format!("{}\r\n", reply).as_bytes()).is_err() {
                    return;
                }
            }
            Answer::Silent => {}
            Answer::Hangup => {
                let _ = writer.shutdown(std::net::Shutdown::Both);
                return;
            }
        }
    }
}
