//! Mock node API for testing.
//!
//! Records all calls to `submit_transaction()` and `ref_exists()` for
//! assertions, serves lookup pages from an in-memory ledger, and lets tests
//! script per-call submit outcomes (accept, accept-but-drop-the-response,
//! structured rejection, network error).

use kstream::api::{ApiFuture, NodeApi, WireSend};
use kstream::transaction::{
    ApiTransaction, Order, Page, PageQuery, Transaction, TransactionFilter,
};
use kstream::{ApiError, StreamError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

/// Scripted outcome for one `submit_transaction()` call.
#[derive(Debug, Clone)]
pub enum SubmitScript {
    /// Land on the ledger, answer ok.
    Accept,
    /// Land on the ledger but lose the response (network error to the
    /// caller). This is the crash-window case the UNKNOWN resolver exists
    /// for.
    AcceptButDrop,
    /// Structured `{ok:false}` rejection; nothing lands.
    Reject(&'static str),
    /// Network error; nothing lands.
    NetworkError,
}

struct MockState {
    ledger: Vec<Transaction>,
    next_id: i64,
    submit_script: VecDeque<SubmitScript>,
    submits: Vec<WireSend>,
    ref_queries: Vec<String>,
    balances: HashMap<String, u64>,
}

/// Recording mock of the node.
pub struct MockNode {
    inner: Mutex<MockState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState {
                ledger: Vec::new(),
                next_id: 0,
                submit_script: VecDeque::new(),
                submits: Vec::new(),
                ref_queries: Vec::new(),
                balances: HashMap::new(),
            }),
        }
    }

    fn make_tx(id: i64, from: Option<&str>, to: &str, value: u64, metadata: Option<&str>) -> Transaction {
        Transaction::decode(ApiTransaction {
            id,
            from: from.map(String::from),
            to: to.to_string(),
            value,
            time: "2024-06-01T10:00:00.000Z".to_string(),
            kind: "transfer".to_string(),
            name: None,
            metadata: metadata.map(String::from),
        })
    }

    /// Append a transfer with an explicit ID.
    pub fn seed_transfer(&self, id: i64, from: &str, to: &str, value: u64) {
        let mut state = self.inner.lock().unwrap();
        state.ledger.push(Self::make_tx(id, Some(from), to, value, None));
        state.next_id = state.next_id.max(id + 1);
    }

    /// Append a transfer carrying a `ref=` tag (as a landed send would).
    pub fn seed_with_ref(&self, id: i64, to: &str, value: u64, ref_id: &str) {
        let metadata = format!("ref={ref_id}");
        let mut state = self.inner.lock().unwrap();
        state
            .ledger
            .push(Self::make_tx(id, Some("kmock"), to, value, Some(&metadata)));
        state.next_id = state.next_id.max(id + 1);
    }

    /// Queue a scripted submit outcome ([`SubmitScript::Accept`] once the
    /// queue is empty).
    pub fn script_submit(&self, script: SubmitScript) {
        self.inner.lock().unwrap().submit_script.push_back(script);
    }

    #[allow(dead_code)] // Useful for future tests
    pub fn set_balance(&self, address: &str, balance: u64) {
        self.inner
            .lock()
            .unwrap()
            .balances
            .insert(address.to_string(), balance);
    }

    /// All recorded `submit_transaction()` bodies.
    pub fn submits(&self) -> Vec<WireSend> {
        self.inner.lock().unwrap().submits.clone()
    }

    /// All recorded `ref_exists()` queries.
    pub fn ref_queries(&self) -> Vec<String> {
        self.inner.lock().unwrap().ref_queries.clone()
    }

    /// Ledger transactions whose metadata carries this ref.
    pub fn ledger_with_ref(&self, ref_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ledger
            .iter()
            .filter(|tx| tx.ref_tag() == Some(ref_id))
            .count()
    }

    #[allow(dead_code)] // Useful for future tests
    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeApi for MockNode {
    fn fetch_page(&self, query: PageQuery) -> ApiFuture<'_, Page> {
        Box::pin(async move {
            let state = self.inner.lock().unwrap();
            let filter = TransactionFilter::new(query.address.clone(), query.include_mined);
            let mut matching: Vec<Transaction> = state
                .ledger
                .iter()
                .filter(|tx| filter.matches(tx))
                .cloned()
                .collect();
            drop(state);
            matching.sort_by_key(|tx| tx.id);
            let total = matching.len() as u64;
            if query.order == Order::Desc {
                matching.reverse();
            }
            let transactions = matching
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .collect();
            Ok(Page {
                total,
                transactions,
            })
        })
    }

    fn ref_exists(&self, ref_id: &str) -> ApiFuture<'_, bool> {
        let ref_id = ref_id.to_string();
        Box::pin(async move {
            let mut state = self.inner.lock().unwrap();
            state.ref_queries.push(ref_id.clone());
            Ok(state
                .ledger
                .iter()
                .any(|tx| tx.ref_tag() == Some(ref_id.as_str())))
        })
    }

    fn submit_transaction(&self, body: WireSend) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().unwrap();
            state.submits.push(body.clone());
            let script = state
                .submit_script
                .pop_front()
                .unwrap_or(SubmitScript::Accept);

            match script {
                SubmitScript::Accept | SubmitScript::AcceptButDrop => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let tx = Self::make_tx(
                        id,
                        Some("ksender"),
                        &body.to,
                        body.amount,
                        Some(&body.metadata),
                    );
                    state.ledger.push(tx);
                    if matches!(script, SubmitScript::AcceptButDrop) {
                        Err(StreamError::http_msg("send", "response lost"))
                    } else {
                        Ok(())
                    }
                }
                SubmitScript::Reject(code) => Err(ApiError::new(code, None).into()),
                SubmitScript::NetworkError => {
                    Err(StreamError::http_msg("send", "connection refused"))
                }
            }
        })
    }

    fn balance(&self, address: &str, _deadline: Option<Instant>) -> ApiFuture<'_, u64> {
        let address = address.to_string();
        Box::pin(async move {
            let state = self.inner.lock().unwrap();
            Ok(state.balances.get(&address).copied().unwrap_or(0))
        })
    }

    fn ws_start(&self) -> ApiFuture<'_, String> {
        // No websocket in tests: the listener stays in its reopen loop and
        // the pipeline runs on backfill alone.
        Box::pin(async { Err(StreamError::http_msg("ws start", "mock node has no socket")) })
    }
}
