use std::{future::Future, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::{sleep_until, Instant},
};
use tracing::debug;

/// Kinds of paced calls; each has its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallClass {
    /// Spacing between content requests for consecutive words.
    Word,
    Image,
}

impl CallClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallClass::Word => "word",
            CallClass::Image => "image",
        }
    }
}

/// Advisory spacing of outbound calls. One clock per class, shared by every worker.
pub struct RatePacer {
    word_interval: Duration,
    image_interval: Duration,
    word_clock: Mutex<Option<Instant>>,
    image_clock: Mutex<Option<Instant>>,
}

impl RatePacer {
    pub fn new(word_interval: Duration, image_interval: Duration) -> Self {
        Self {
            word_interval,
            image_interval,
            word_clock: Mutex::new(None),
            image_clock: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn interval(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Word => self.word_interval,
            CallClass::Image => self.image_interval,
        }
    }

    fn clock(&self, class: CallClass) -> &Mutex<Option<Instant>> {
        match class {
            CallClass::Word => &self.word_clock,
            CallClass::Image => &self.image_clock,
        }
    }

    /// Suspends until `interval(class)` has passed since the previous call of the class.
    ///
    /// Waiters queue on the class clock, so concurrent callers are released one interval apart.
    pub async fn wait(&self, class: CallClass) {
        if self.interval(class).is_zero() {
            return;
        }
        let mut last = self.clock(class).lock().await;
        self.sleep_out_interval(class, &last).await;
        *last = Some(Instant::now());
    }

    /// Moves the class clock to the completion time of a call.
    pub async fn mark_complete(&self, class: CallClass) {
        if self.interval(class).is_zero() {
            return;
        }
        let mut last = self.clock(class).lock().await;
        let now = Instant::now();
        *last = Some(last.map_or(now, |previous| previous.max(now)));
    }

    /// Waits for the class slot, runs `call`, then records its completion.
    ///
    /// The class clock stays locked while `call` runs, so two calls of one class never overlap
    /// and the next one starts no earlier than one interval after this one finished.
    pub async fn paced<F, T>(&self, class: CallClass, call: F) -> T
    where
        F: Future<Output = T>,
    {
        if self.interval(class).is_zero() {
            return call.await;
        }
        let mut last = self.clock(class).lock().await;
        self.sleep_out_interval(class, &last).await;
        let output = call.await;
        *last = Some(Instant::now());
        output
    }

    async fn sleep_out_interval(&self, class: CallClass, last: &MutexGuard<'_, Option<Instant>>) {
        let Some(ready) = last.and_then(|previous| previous.checked_add(self.interval(class))) else {
            return;
        };
        let now = Instant::now();
        if ready > now {
            debug!(
                class = class.as_str(),
                wait_ms = u64::try_from((ready - now).as_millis()).unwrap_or(u64::MAX),
                "pacing outbound call"
            );
            sleep_until(ready).await;
        }
    }
}
