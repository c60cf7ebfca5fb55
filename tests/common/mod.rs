//! Scripted stand-in for the remote execution engine.

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kevm_bridge::{BridgeError, ClientMessage, FrameCodec, VmQuery};
use revm::primitives::{Address, Bytes, Log, B256, U256};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One step the engine takes after receiving a call context.
pub enum Step {
    /// Send a query and wait for the client's response.
    Ask(VmQuery),
    /// Send raw bytes and expect nothing back.
    Raw(Vec<u8>),
    /// Send a message one byte per write.
    Trickle(VmQuery),
    /// Stop answering and wait (up to five seconds) for the client to hang up.
    Stall,
}

/// Everything the engine saw from the client.
#[derive(Debug, Default)]
pub struct Transcript {
    pub messages: Vec<ClientMessage>,
    /// The client closed its end while the engine was stalled.
    pub hung_up: bool,
}

impl Transcript {
    pub fn responses(&self) -> Vec<&ClientMessage> {
        self.messages
            .iter()
            .filter(|m| matches!(m, ClientMessage::Response(_)))
            .collect()
    }
}

pub struct ScriptedEngine {
    pub endpoint: String,
    handle: JoinHandle<Transcript>,
}

impl ScriptedEngine {
    /// Listen on loopback; for each script, read one call context and play the steps.
    pub fn spawn(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            play(&mut conn, scripts)
        });
        Self { endpoint, handle }
    }

    pub fn join(self) -> Transcript {
        self.handle.join().unwrap()
    }
}

fn play(conn: &mut TcpStream, scripts: Vec<Vec<Step>>) -> Transcript {
    let codec = FrameCodec::default();
    let mut transcript = Transcript::default();
    transcript.messages.push(codec.read(conn).unwrap());

    for steps in scripts {
        transcript.messages.push(codec.read(conn).unwrap());
        for step in steps {
            match step {
                Step::Ask(query) => {
                    let terminal = matches!(query, VmQuery::CallResult(_));
                    codec.write(conn, &query).unwrap();
                    if !terminal {
                        transcript.messages.push(codec.read(conn).unwrap());
                    }
                }
                Step::Raw(bytes) => conn.write_all(&bytes).unwrap(),
                Step::Trickle(query) => {
                    for byte in codec.encode(&query).unwrap() {
                        conn.write_all(&[byte]).unwrap();
                        conn.flush().unwrap();
                    }
                }
                Step::Stall => {
                    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                    if let Err(BridgeError::Connection(e)) = codec.read::<_, ClientMessage>(conn) {
                        transcript.hung_up = e.kind() == io::ErrorKind::UnexpectedEof;
                    }
                    return transcript;
                }
            }
        }
    }
    transcript
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn digest(distance: u64) -> B256 {
    B256::with_last_byte(distance as u8)
}

/// Counts every mutator call while delegating to an inner adapter.
#[derive(Default)]
pub struct CountingState<S> {
    pub inner: S,
    pub mutations: usize,
}

impl<S: kevm_bridge::StateAdapter> kevm_bridge::StateAdapter for CountingState<S> {
    fn create_account(&mut self, addr: Address) {
        self.mutations += 1;
        self.inner.create_account(addr)
    }
    fn get_balance(&self, addr: Address) -> U256 {
        self.inner.get_balance(addr)
    }
    fn add_balance(&mut self, addr: Address, amount: U256) {
        self.mutations += 1;
        self.inner.add_balance(addr, amount)
    }
    fn sub_balance(&mut self, addr: Address, amount: U256) {
        self.mutations += 1;
        self.inner.sub_balance(addr, amount)
    }
    fn get_nonce(&self, addr: Address) -> u64 {
        self.inner.get_nonce(addr)
    }
    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.mutations += 1;
        self.inner.set_nonce(addr, nonce)
    }
    fn get_code(&self, addr: Address) -> Bytes {
        self.inner.get_code(addr)
    }
    fn set_code(&mut self, addr: Address, code: Bytes) {
        self.mutations += 1;
        self.inner.set_code(addr, code)
    }
    fn get_code_hash(&self, addr: Address) -> B256 {
        self.inner.get_code_hash(addr)
    }
    fn get_code_size(&self, addr: Address) -> usize {
        self.inner.get_code_size(addr)
    }
    fn get_state(&self, addr: Address, key: B256) -> B256 {
        self.inner.get_state(addr, key)
    }
    fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        self.mutations += 1;
        self.inner.set_state(addr, key, value)
    }
    fn exist(&self, addr: Address) -> bool {
        self.inner.exist(addr)
    }
    fn empty(&self, addr: Address) -> bool {
        self.inner.empty(addr)
    }
    fn remove(&mut self, addr: Address) -> bool {
        self.mutations += 1;
        self.inner.remove(addr)
    }
    fn add_refund(&mut self, gas: u64) {
        self.mutations += 1;
        self.inner.add_refund(gas)
    }
    fn add_log(&mut self, log: Log) {
        self.mutations += 1;
        self.inner.add_log(log)
    }
}
