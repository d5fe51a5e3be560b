use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use voxpersona_core::config::CredentialConfig;

use crate::error::PoolError;

/// Budget accounting window. Both the TPM and RPM invariants are expressed
/// over this rolling span.
const WINDOW: Duration = Duration::from_secs(60);
/// Actual usage above estimate * tolerance is charged retroactively, which
/// delays the credential's next acquisition.
const OVERRUN_TOLERANCE: f64 = 1.2;

/// An independent authentication principal at the LLM provider.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: u32,
    pub secret: String,
    /// Tokens-per-minute budget.
    pub tpm: u32,
    /// Requests-per-minute budget.
    pub rpm: u32,
}

impl Credential {
    pub fn from_config(cfg: &CredentialConfig) -> Self {
        Self {
            id: cfg.id,
            secret: cfg.secret.clone(),
            tpm: cfg.tpm,
            rpm: cfg.rpm,
        }
    }
}

/// Which waiting line an acquisition joins.
///
/// Interactive waiters (dialog answers, report chains) are granted before
/// bulk fan-out waiters when both could run right now; bulk grants rotate
/// round-robin across credentials so one credential's budget is not drained
/// by a single fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueClass {
    Interactive,
    Bulk,
}

/// How a granted call ended, reported through `CredentialPermit::release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ok,
    Failed,
    /// Granted but the call never issued. Refunds the reserved budget.
    Cancelled,
}

// --- usage accounting -------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct UsageEvent {
    at: Instant,
    amount: f64,
    serial: u64,
}

/// Rolling-window usage log for one budget dimension (tokens or requests).
///
/// Events age out exactly `WINDOW` after they were charged, so the sum of
/// live events is the usage inside the current rolling window. This makes
/// the per-minute invariant hold for *every* window, not just aligned ones.
#[derive(Debug)]
struct UsageWindow {
    capacity: f64,
    events: VecDeque<UsageEvent>,
    next_serial: u64,
}

impl UsageWindow {
    fn new(per_minute: u32) -> Self {
        Self {
            capacity: per_minute as f64,
            events: VecDeque::new(),
            next_serial: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(e) = self.events.front() {
            if e.at + WINDOW <= now {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> f64 {
        self.events.iter().map(|e| e.amount).sum()
    }

    fn headroom(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.capacity - self.used()
    }

    /// Earliest instant `amount` fits in the window. Returns `now` when it
    /// already fits. An amount larger than the whole capacity is feasible
    /// only against an empty window.
    fn ready_at(&mut self, amount: f64, now: Instant) -> Instant {
        self.prune(now);
        let mut used = self.used();
        if used + amount <= self.capacity {
            return now;
        }
        let mut ready = now;
        for e in &self.events {
            used -= e.amount;
            ready = e.at + WINDOW;
            if used + amount <= self.capacity {
                break;
            }
        }
        ready
    }

    fn charge(&mut self, amount: f64, now: Instant) -> u64 {
        self.prune(now);
        let serial = self.next_serial;
        self.next_serial += 1;
        self.events.push_back(UsageEvent {
            at: now,
            amount,
            serial,
        });
        serial
    }

    fn refund(&mut self, serial: u64) {
        if let Some(pos) = self.events.iter().position(|e| e.serial == serial) {
            self.events.remove(pos);
        }
    }
}

// --- pool internals ---------------------------------------------------------

#[derive(Debug)]
struct CredState {
    cred: Arc<Credential>,
    tokens: UsageWindow,
    requests: UsageWindow,
    /// Per-credential serial-use lock: no two calls overlap on one credential.
    in_use: bool,
    /// Set when the provider rejected the credential (401/403). Stays set
    /// for the remainder of the process; there is no automatic rotation.
    quarantined: bool,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    estimate: f64,
}

#[derive(Debug)]
struct PoolInner {
    creds: Vec<CredState>,
    interactive: VecDeque<Waiter>,
    bulk: VecDeque<Waiter>,
    next_ticket: u64,
    /// Round-robin cursor for bulk grants.
    bulk_rr: usize,
}

impl PoolInner {
    /// Best credential for a grant: earliest feasible instant, ties broken
    /// by larger remaining token headroom (large jobs gravitate to the
    /// highest-TPM credential).
    fn best_for(&mut self, estimate: f64, now: Instant) -> Option<(usize, Instant)> {
        let mut best: Option<(usize, Instant, f64)> = None;
        for i in 0..self.creds.len() {
            let c = &mut self.creds[i];
            if c.in_use || c.quarantined {
                continue;
            }
            let ready = c
                .tokens
                .ready_at(estimate, now)
                .max(c.requests.ready_at(1.0, now));
            let headroom = c.tokens.headroom(now);
            let better = match &best {
                None => true,
                Some((_, b_ready, b_head)) => {
                    ready < *b_ready || (ready == *b_ready && headroom > *b_head)
                }
            };
            if better {
                best = Some((i, ready, headroom));
            }
        }
        best.map(|(i, ready, _)| (i, ready))
    }

    /// Round-robin pick for bulk grants, restricted to credentials that can
    /// serve the estimate right now.
    fn bulk_feasible_now(&mut self, estimate: f64, now: Instant) -> Option<usize> {
        let n = self.creds.len();
        for k in 0..n {
            let i = (self.bulk_rr + k) % n;
            let c = &mut self.creds[i];
            if c.in_use || c.quarantined {
                continue;
            }
            let ready = c
                .tokens
                .ready_at(estimate, now)
                .max(c.requests.ready_at(1.0, now));
            if ready <= now {
                self.bulk_rr = (i + 1) % n;
                return Some(i);
            }
        }
        None
    }

    fn queue_mut(&mut self, class: QueueClass) -> &mut VecDeque<Waiter> {
        match class {
            QueueClass::Interactive => &mut self.interactive,
            QueueClass::Bulk => &mut self.bulk,
        }
    }
}

enum Verdict {
    Granted(CredentialPermit),
    /// Not grantable yet. `Some(t)` is the earliest instant worth re-checking;
    /// `None` means "wait for a release/withdrawal notification".
    Wait(Option<Instant>),
}

/// Hands out time-budgeted permits over a fixed set of credentials.
///
/// This is the sole rate limiter in the system: `acquire` suspends until a
/// credential can serve the estimated tokens without violating its TPM or
/// RPM budget in any rolling 60 s window, then reserves it exclusively
/// until the permit is released.
pub struct CredentialPool {
    inner: Arc<Mutex<PoolInner>>,
    notify: Arc<Notify>,
}

impl CredentialPool {
    pub fn new(creds: Vec<Credential>) -> Self {
        let creds = creds
            .into_iter()
            .map(|c| CredState {
                tokens: UsageWindow::new(c.tpm),
                requests: UsageWindow::new(c.rpm),
                in_use: false,
                quarantined: false,
                cred: Arc::new(c),
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                creds,
                interactive: VecDeque::new(),
                bulk: VecDeque::new(),
                next_ticket: 0,
                bulk_rr: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Acquire a credential for a synchronous single-shot call.
    pub async fn acquire(
        &self,
        estimated_tokens: u32,
        deadline: Instant,
    ) -> Result<CredentialPermit, PoolError> {
        self.acquire_as(QueueClass::Interactive, estimated_tokens, deadline)
            .await
    }

    /// Acquire a credential for one unit of a bulk fan-out job.
    pub async fn acquire_bulk(
        &self,
        estimated_tokens: u32,
        deadline: Instant,
    ) -> Result<CredentialPermit, PoolError> {
        self.acquire_as(QueueClass::Bulk, estimated_tokens, deadline)
            .await
    }

    pub fn credential_count(&self) -> usize {
        self.inner.lock().unwrap().creds.len()
    }

    /// Exclude a credential for the remainder of the process, typically
    /// after the gateway surfaced a credential error for it.
    pub fn quarantine(&self, credential_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        for state in &mut inner.creds {
            if state.cred.id == credential_id {
                state.quarantined = true;
                warn!(credential = credential_id, "credential quarantined");
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    async fn acquire_as(
        &self,
        class: QueueClass,
        estimated_tokens: u32,
        deadline: Instant,
    ) -> Result<CredentialPermit, PoolError> {
        let estimate = estimated_tokens as f64;
        let ticket = {
            let mut inner = self.inner.lock().unwrap();
            if inner.creds.is_empty() {
                return Err(PoolError::Empty);
            }
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.queue_mut(class).push_back(Waiter { ticket, estimate });
            ticket
        };
        trace!(?class, ticket, estimated_tokens, "queued");

        // Dequeues the ticket if this future is dropped while still waiting,
        // so a cancelled waiter withdraws without consuming budget.
        let mut guard = QueueGuard {
            pool: self,
            class,
            ticket,
            armed: true,
        };

        loop {
            // Register for notifications before checking state, so a release
            // that lands between the check and the await is not missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();

            let now = Instant::now();
            match self.try_grant(class, ticket, estimate, now) {
                Verdict::Granted(permit) => {
                    guard.armed = false;
                    return Ok(permit);
                }
                Verdict::Wait(until) => {
                    if now >= deadline {
                        return Err(PoolError::Timeout);
                    }
                    let wake = match until {
                        Some(t) if t < deadline => t,
                        _ => deadline,
                    };
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(wake) => {}
                    }
                }
            }
        }
    }

    fn try_grant(&self, class: QueueClass, ticket: u64, estimate: f64, now: Instant) -> Verdict {
        let mut inner = self.inner.lock().unwrap();

        let is_head = inner
            .queue_mut(class)
            .front()
            .map(|w| w.ticket == ticket)
            .unwrap_or(false);
        if !is_head {
            return Verdict::Wait(None);
        }

        match class {
            QueueClass::Interactive => match inner.best_for(estimate, now) {
                Some((idx, ready)) if ready <= now => self.grant(&mut inner, class, idx, estimate, now),
                Some((_, ready)) => Verdict::Wait(Some(ready)),
                None => Verdict::Wait(None),
            },
            QueueClass::Bulk => {
                // The interactive head goes first when it could run now.
                let head_estimate = inner.interactive.front().map(|w| w.estimate);
                if let Some(est) = head_estimate {
                    if matches!(inner.best_for(est, now), Some((_, r)) if r <= now) {
                        return Verdict::Wait(None);
                    }
                }
                match inner.bulk_feasible_now(estimate, now) {
                    Some(idx) => self.grant(&mut inner, class, idx, estimate, now),
                    None => {
                        let ready = inner.best_for(estimate, now).map(|(_, r)| r);
                        Verdict::Wait(ready)
                    }
                }
            }
        }
    }

    fn grant(
        &self,
        inner: &mut PoolInner,
        class: QueueClass,
        idx: usize,
        estimate: f64,
        now: Instant,
    ) -> Verdict {
        let token_serial = inner.creds[idx].tokens.charge(estimate, now);
        let request_serial = inner.creds[idx].requests.charge(1.0, now);
        inner.creds[idx].in_use = true;
        let cred = inner.creds[idx].cred.clone();
        inner.queue_mut(class).pop_front();

        debug!(credential = cred.id, estimate, "permit granted");
        // Wake the next head so grant passes cascade.
        self.notify.notify_waiters();

        Verdict::Granted(CredentialPermit {
            pool: self.inner.clone(),
            notify: self.notify.clone(),
            cred,
            cred_idx: idx,
            estimate,
            token_serial,
            request_serial,
            settled: false,
        })
    }
}

struct QueueGuard<'a> {
    pool: &'a CredentialPool,
    class: QueueClass,
    ticket: u64,
    armed: bool,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.pool.inner.lock().unwrap();
        let queue = inner.queue_mut(self.class);
        if let Some(pos) = queue.iter().position(|w| w.ticket == self.ticket) {
            queue.remove(pos);
        }
        drop(inner);
        self.pool.notify.notify_waiters();
    }
}

/// Exclusive, budget-charged hold on one credential.
///
/// The estimated tokens and one request slot were charged at grant time.
/// `release` reconciles with the observed usage; dropping the permit
/// without releasing keeps the estimated charge and frees the credential.
#[derive(Debug)]
pub struct CredentialPermit {
    pool: Arc<Mutex<PoolInner>>,
    notify: Arc<Notify>,
    cred: Arc<Credential>,
    cred_idx: usize,
    estimate: f64,
    token_serial: u64,
    request_serial: u64,
    settled: bool,
}

impl CredentialPermit {
    pub fn credential(&self) -> &Credential {
        &self.cred
    }

    /// Record the call's actual usage and free the credential.
    ///
    /// `Cancelled` refunds both the token estimate and the request slot —
    /// the call never reached the provider. Otherwise an actual above the
    /// 20 % tolerance is charged on top, delaying the next acquisition.
    pub fn release(mut self, actual_tokens: u32, status: CallStatus) {
        let now = Instant::now();
        let mut inner = self.pool.lock().unwrap();
        let state = &mut inner.creds[self.cred_idx];
        match status {
            CallStatus::Cancelled => {
                state.tokens.refund(self.token_serial);
                state.requests.refund(self.request_serial);
            }
            CallStatus::Ok | CallStatus::Failed => {
                let actual = actual_tokens as f64;
                if actual > self.estimate * OVERRUN_TOLERANCE {
                    state.tokens.charge(actual - self.estimate, now);
                }
            }
        }
        state.in_use = false;
        self.settled = true;
        drop(inner);
        self.notify.notify_waiters();
    }
}

impl Drop for CredentialPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.pool.lock().unwrap();
        inner.creds[self.cred_idx].in_use = false;
        drop(inner);
        self.notify.notify_waiters();
    }
}
