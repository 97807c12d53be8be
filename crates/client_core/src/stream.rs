//! Incremental reveal of an already received reply.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::config::ClientSettings;

/// Growing prefixes of a text, split on character boundaries, ending with the full text.
#[derive(Debug, Clone)]
pub struct RevealFrames<'a> {
    text: &'a str,
    chars_per_step: usize,
    shown: usize,
    done: bool,
}

impl<'a> RevealFrames<'a> {
    pub fn new(text: &'a str, chars_per_step: NonZeroUsize) -> Self {
        Self {
            text,
            chars_per_step: chars_per_step.get(),
            shown: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for RevealFrames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = self.text[self.shown..]
            .char_indices()
            .nth(self.chars_per_step)
            .map(|(offset, _)| self.shown + offset)
            .unwrap_or(self.text.len());
        if end == self.text.len() {
            self.done = true;
        }
        self.shown = end;
        Some(&self.text[..end])
    }
}

/// Receives reveal frames for one message slot.
#[async_trait]
pub trait RevealSink: Send + Sync + 'static {
    /// Replaces the displayed content. Returning `false` stops the reveal.
    async fn show(&self, prefix: &str) -> bool;
    async fn finish(&self);
}

pub struct RevealHandle {
    task: JoinHandle<()>,
}

impl RevealHandle {
    /// Stops further frames. The caller's copy of the full text is untouched.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamRenderer {
    interval: Duration,
    chars_per_step: NonZeroUsize,
}

impl Default for StreamRenderer {
    fn default() -> Self {
        Self::new(Duration::from_millis(15), NonZeroUsize::MIN)
    }
}

impl StreamRenderer {
    pub fn new(interval: Duration, chars_per_step: NonZeroUsize) -> Self {
        Self {
            interval,
            chars_per_step,
        }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO, NonZeroUsize::MIN)
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(
            settings.reveal_interval(),
            NonZeroUsize::new(settings.reveal_chars_per_step).unwrap_or(NonZeroUsize::MIN),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn frames<'a>(&self, text: &'a str) -> RevealFrames<'a> {
        RevealFrames::new(text, self.chars_per_step)
    }

    pub fn start(&self, text: String, sink: Arc<dyn RevealSink>) -> RevealHandle {
        let renderer = *self;
        let task = tokio::spawn(async move {
            if renderer.interval.is_zero() {
                if sink.show(&text).await {
                    sink.finish().await;
                }
                return;
            }

            let mut ticker = tokio::time::interval(renderer.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            for frame in renderer.frames(&text) {
                ticker.tick().await;
                if !sink.show(frame).await {
                    return;
                }
            }
            sink.finish().await;
        });
        RevealHandle { task }
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
