use crate::messaging::models::JobDescriptor;
use crate::messaging::queue::{envelope, Delivery, JobMessage, JobQueue, QueueEndpoint, QueueError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Default)]
struct State {
    pending: VecDeque<JobMessage>,
    in_flight: HashMap<String, (JobMessage, Instant)>,
}

/// 行程內佇列，單機執行與測試使用
pub struct InMemoryJobQueue {
    name: String,
    state: Mutex<State>,
    available: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// 模擬後端斷線
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!("in-memory queue {} is offline", self.name)))
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn endpoint(&self) -> QueueEndpoint {
        QueueEndpoint {
            backend: "memory".into(),
            host: None,
            port: None,
            queue: self.name.clone(),
        }
    }

    async fn enqueue(&self, job: JobDescriptor) -> Result<String, QueueError> {
        self.check()?;
        let message = envelope(job);
        let id = message.message_id.clone();
        self.state.lock().pending.push_back(message);
        Ok(id)
    }

    async fn claim(&self, visibility_timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        self.check()?;
        let mut state = self.state.lock();
        let Some(message) = state.pending.pop_front() else {
            return Ok(None);
        };
        let receipt = Uuid::new_v4().to_string();
        state
            .in_flight
            .insert(receipt.clone(), (message.clone(), Instant::now() + visibility_timeout));
        Ok(Some(Delivery { receipt, message }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check()?;
        self.state
            .lock()
            .in_flight
            .remove(&delivery.receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.check()?;
        let mut state = self.state.lock();
        let (mut message, _) = state
            .in_flight
            .remove(&delivery.receipt)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))?;
        if requeue {
            message.mark_redelivered();
            state.pending.push_back(message);
        }
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in &expired {
            if let Some((mut message, _)) = state.in_flight.remove(receipt) {
                message.mark_redelivered();
                state.pending.push_back(message);
            }
        }
        Ok(expired.len())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        self.check()?;
        Ok(self.state.lock().pending.len())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check()
    }
}
