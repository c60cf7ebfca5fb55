//! One persistent connection to the execution engine and the per-invocation
//! query loop.
//!
//! Protocol per invocation:
//!
//! ```text
//! client                         engine
//!   | -- CallContext -------------> |
//!   | <------------- VmQuery::Get* -- |   zero or more times,
//!   | -- Response ----------------> |   each answered immediately
//!   | <---------- VmQuery::CallResult |   ends the invocation
//! ```
//!
//! Exactly one request is outstanding at a time. `call` and `create` take
//! `&mut self`, which serializes invocations on a session.

use std::time::Duration;

use revm::primitives::{Address, Bytes, U256};
use tracing::{debug, info, trace, warn};

use crate::codec::FrameCodec;
use crate::config::{BridgeConfig, ChainConfig};
use crate::error::{BridgeError, Result};
use crate::messages::{
    AccountData, CallContext, CallResult, ClientMessage, Hello, QueryResponse, VmQuery, PROTOCOL_VERSION,
};
use crate::reconcile::{reconcile, Outcome};
use crate::state::{BlockHashResolver, StateAdapter};
use crate::transport::{is_timeout, Connection, FrameDeadline, Transport};

/// Queries served during one invocation, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub code: u32,
    pub account: u32,
    pub blockhash: u32,
    pub storage: u32,
}

impl QueryStats {
    pub fn total(&self) -> u32 {
        self.code + self.account + self.blockhash + self.storage
    }
}

/// Bridge session: owns the connection, the host state adapter and the
/// block-hash resolver.
pub struct Session<S, R, T = Connection> {
    transport: T,
    codec: FrameCodec,
    read_timeout: Option<Duration>,
    state: S,
    resolver: R,
    poisoned: bool,
    last_stats: QueryStats,
}

impl<S, R> Session<S, R, Connection>
where
    S: StateAdapter,
    R: BlockHashResolver,
{
    /// Dial the configured endpoint and perform the handshake.
    pub fn connect(config: &BridgeConfig, chain: &ChainConfig, state: S, resolver: R) -> Result<Self> {
        let conn = Connection::open(&config.endpoint, config.connect_timeout)?;
        Self::with_transport(conn, config, chain, state, resolver)
    }
}

impl<S, R, T> Session<S, R, T>
where
    S: StateAdapter,
    R: BlockHashResolver,
    T: Transport,
{
    /// Handshake over an already-open transport.
    ///
    /// Hello is written exactly once, here. Any failure drops the transport:
    /// there is no half-initialized session to retry on.
    pub fn with_transport(
        mut transport: T,
        config: &BridgeConfig,
        chain: &ChainConfig,
        state: S,
        resolver: R,
    ) -> Result<Self> {
        transport
            .set_read_deadline(config.read_timeout)
            .map_err(|e| BridgeError::HandshakeFailed(format!("read deadline rejected: {e}")))?;
        let codec = FrameCodec::new(config.max_frame_len);

        let chain_config = chain.to_json().map_err(|e| BridgeError::HandshakeFailed(e.to_string()))?;
        let hello = ClientMessage::Hello(Hello { protocol_version: PROTOCOL_VERSION, chain_config });
        codec
            .write(&mut transport, &hello)
            .map_err(|e| BridgeError::HandshakeFailed(e.to_string()))?;
        info!(
            chain_id = chain.chain_id,
            forks = chain.forks.len(),
            max_frame_len = codec.max_frame_len(),
            "handshake sent"
        );

        Ok(Self {
            transport,
            codec,
            read_timeout: config.read_timeout,
            state,
            resolver,
            poisoned: false,
            last_stats: QueryStats::default(),
        })
    }

    /// Execute a message call against `recipient`. Returns the return data and leftover gas.
    pub fn call(
        &mut self,
        caller: Address,
        recipient: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> Result<(Bytes, u64)> {
        let ctx = CallContext { caller, recipient: Some(recipient), input, value, gas };
        let outcome = self.execute(ctx)?;
        Ok((outcome.return_data, outcome.gas_left))
    }

    /// Deploy `code`. Returns the return data, the new contract's address and leftover gas.
    pub fn create(&mut self, caller: Address, code: Bytes, gas: u64, value: U256) -> Result<(Bytes, Address, u64)> {
        let ctx = CallContext { caller, recipient: None, input: code, value, gas };
        let outcome = self.execute(ctx)?;
        let address = outcome
            .created_address
            .ok_or_else(|| BridgeError::Protocol("create result without created address".into()))?;
        Ok((outcome.return_data, address, outcome.gas_left))
    }

    /// Run one request/response cycle and reconcile the result.
    ///
    /// A fatal error poisons the session and shuts the connection down; later
    /// invocations fail with [`BridgeError::SessionPoisoned`].
    pub fn execute(&mut self, ctx: CallContext) -> Result<Outcome> {
        if self.poisoned {
            return Err(BridgeError::SessionPoisoned);
        }
        let result = self.run(ctx);
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(%err, "execution engine session poisoned");
                self.poisoned = true;
                if let Err(e) = self.transport.shutdown() {
                    debug!(%e, "closing poisoned connection");
                }
            }
        }
        result
    }

    fn run(&mut self, ctx: CallContext) -> Result<Outcome> {
        let is_create = ctx.is_create();
        debug!(
            caller = %ctx.caller,
            recipient = ?ctx.recipient,
            gas = ctx.gas,
            input_len = ctx.input.len(),
            "sending call context"
        );
        self.codec.write(&mut self.transport, &ClientMessage::CallContext(ctx))?;

        let result = self.serve_queries()?;
        if is_create && !result.error && result.created_address.is_none() {
            return Err(BridgeError::Protocol("create result without created address".into()));
        }
        reconcile(&mut self.state, result)
    }

    /// Answer engine queries until the terminal `CallResult` arrives.
    fn serve_queries(&mut self) -> Result<CallResult> {
        let mut stats = QueryStats::default();
        loop {
            let query = self.read_query()?;
            trace!(kind = query.kind(), "engine message");
            let response = match query {
                VmQuery::CallResult(result) => {
                    debug!(
                        queries = stats.total(),
                        code = stats.code,
                        account = stats.account,
                        blockhash = stats.blockhash,
                        storage = stats.storage,
                        error = result.error,
                        "call result received"
                    );
                    self.last_stats = stats;
                    return Ok(result);
                }
                VmQuery::GetCode(addr) => {
                    stats.code += 1;
                    QueryResponse::Code(self.state.get_code(addr))
                }
                VmQuery::GetAccount(addr) => {
                    stats.account += 1;
                    QueryResponse::Account(self.account_data(addr))
                }
                VmQuery::GetBlockhash(distance) => {
                    stats.blockhash += 1;
                    QueryResponse::Blockhash(self.resolver.hash(distance))
                }
                VmQuery::GetStorageData(addr, key) => {
                    stats.storage += 1;
                    QueryResponse::StorageData(self.state.get_state(addr, key))
                }
            };
            self.codec.write(&mut self.transport, &ClientMessage::Response(response))?;
        }
    }

    /// Read the next engine frame; the read timeout bounds the frame as a whole.
    fn read_query(&mut self) -> Result<VmQuery> {
        let mut reader = FrameDeadline::new(&mut self.transport, self.read_timeout);
        match self.codec.read(&mut reader) {
            Err(BridgeError::Connection(e)) if is_timeout(&e) => {
                Err(BridgeError::EngineTimeout(self.read_timeout.unwrap_or_default()))
            }
            other => other,
        }
    }

    fn account_data(&self, addr: Address) -> AccountData {
        if !self.state.exist(addr) {
            return AccountData::absent();
        }
        let mut data = AccountData {
            exists: true,
            balance: self.state.get_balance(addr),
            nonce: self.state.get_nonce(addr),
            ..Default::default()
        };
        if self.state.get_code_size(addr) == 0 {
            data.code_empty = true;
        } else {
            data.code_hash = self.state.get_code_hash(addr);
        }
        data
    }
}

impl<S, R, T> Session<S, R, T> {
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Query counts from the most recent completed invocation.
    pub fn last_stats(&self) -> QueryStats {
        self.last_stats
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    pub fn into_state(self) -> S {
        self.state
    }
}
