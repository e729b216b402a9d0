// rust/mirror-core/src/dataset/prefetch.rs

//! Prefetching stage for overlapping input production with consumption.
//!
//! The upstream iterator is driven on a separate thread that fills a bounded
//! queue, so the training loop only waits when the producer falls behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;

use super::element::Element;
use super::iterator::BoxedIter;
use crate::error::{Result, StrategyError};

/// Default time a consumer waits on an empty queue before giving up.
pub const DEFAULT_PREFETCH_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_micros(100);

type PrefetchItem = Result<Element>;

/// An iterator that produces elements ahead of time on a background thread.
pub struct PrefetchingIterator {
    /// Queue of produced elements.
    queue: Arc<ArrayQueue<PrefetchItem>>,
    /// Flag to signal the producer thread to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the producer thread.
    producer: Option<JoinHandle<()>>,
    /// Upstream iterator when prefetching is disabled.
    passthrough: Option<BoxedIter>,
    timeout: Duration,
    exhausted: bool,
}

impl PrefetchingIterator {
    /// Starts prefetching up to `buffer_size` elements from `upstream`.
    ///
    /// A `buffer_size` of zero disables the background thread and pulls
    /// from `upstream` directly.
    pub fn new(upstream: BoxedIter, buffer_size: usize, timeout: Duration) -> Self {
        if buffer_size == 0 {
            return Self {
                queue: Arc::new(ArrayQueue::new(1)),
                stop_flag: Arc::new(AtomicBool::new(false)),
                producer: None,
                passthrough: Some(upstream),
                timeout,
                exhausted: false,
            };
        }

        let queue = Arc::new(ArrayQueue::new(buffer_size));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let producer_queue = queue.clone();
        let producer_stop = stop_flag.clone();

        let producer = thread::spawn(move || {
            tracing::trace!(buffer_size, "prefetch producer started");
            let mut upstream = upstream;

            while !producer_stop.load(Ordering::Relaxed) {
                let Some(mut item) = upstream.next() else {
                    break;
                };
                let failed = item.is_err();

                // Block until there is room, unless asked to stop.
                loop {
                    if producer_stop.load(Ordering::Relaxed) {
                        return;
                    }
                    match producer_queue.push(item) {
                        Ok(()) => break,
                        Err(returned) => {
                            item = returned;
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }

                if failed {
                    break;
                }
            }
            tracing::trace!("prefetch producer finished");
        });

        Self {
            queue,
            stop_flag,
            producer: Some(producer),
            passthrough: None,
            timeout,
            exhausted: false,
        }
    }

    /// Gets the next element.
    pub fn next_element(&mut self) -> Result<Option<Element>> {
        if self.exhausted {
            return Ok(None);
        }

        if let Some(ref mut upstream) = self.passthrough {
            return match upstream.next() {
                Some(Ok(element)) => Ok(Some(element)),
                Some(Err(e)) => {
                    self.exhausted = true;
                    Err(e)
                }
                None => {
                    self.exhausted = true;
                    Ok(None)
                }
            };
        }

        let started = Instant::now();
        loop {
            if let Some(item) = self.queue.pop() {
                return self.deliver(item);
            }

            let finished = self.producer.as_ref().map_or(true, JoinHandle::is_finished);
            if finished {
                // The producer may have pushed its last element after our pop.
                if let Some(item) = self.queue.pop() {
                    return self.deliver(item);
                }
                self.exhausted = true;
                if let Some(producer) = self.producer.take() {
                    if producer.join().is_err() {
                        return Err(StrategyError::dataset("prefetch", "producer thread panicked"));
                    }
                }
                return Ok(None);
            }

            if started.elapsed() >= self.timeout {
                return Err(StrategyError::dataset(
                    "prefetch",
                    format!("no element produced within {:?}", self.timeout),
                ));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn deliver(&mut self, item: PrefetchItem) -> Result<Option<Element>> {
        match item {
            Ok(element) => Ok(Some(element)),
            Err(e) => {
                self.exhausted = true;
                Err(e)
            }
        }
    }

    /// Stops the producer thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);

        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                tracing::warn!("prefetch producer panicked before it was stopped");
            }
        }
    }

    /// Returns true if a background producer is running.
    pub fn is_prefetching_enabled(&self) -> bool {
        self.passthrough.is_none()
    }

    /// Returns the number of elements currently buffered.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Iterator for PrefetchingIterator {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_element().transpose()
    }
}

impl Drop for PrefetchingIterator {
    fn drop(&mut self) {
        self.stop();
    }
}
