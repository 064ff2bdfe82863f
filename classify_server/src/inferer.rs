//! Live classification of image streams.
//!
//! Once enabled for a channel, a loop picks the newest frame of that channel, classifies it and
//! publishes the result. The next frame is only picked after the previous one is done, so a
//! slow model skips frames instead of falling behind.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::prediction::Prediction;
use image::RgbImage;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::{
    annotate::draw_confidence_bar,
    meter::METER,
    model::{ModelHandle, SharedClassifier},
    pubsub::{classified_channel, BytesReceiver, BytesSender, NamedPubSub},
};

/// JPEG quality of annotated frames.
const JPEG_QUALITY: i32 = 85;

#[derive(Default)]
struct ChannelState {
    prediction: Option<Prediction>,
    last_polled: Option<Instant>,
    running: bool,
}

pub struct LiveClassifier {
    pubsub: Arc<NamedPubSub>,
    model: Arc<ModelHandle>,
    idle_timeout: Duration,
    channels: Mutex<HashMap<String, ChannelState>>,
}

impl LiveClassifier {
    pub fn new(pubsub: Arc<NamedPubSub>, model: Arc<ModelHandle>, idle_timeout: Duration) -> Self {
        Self {
            pubsub,
            model,
            idle_timeout,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Start classifying the stream `name`.
    ///
    /// Fails while the model is not loaded yet. Returns `false` if a loop already runs on
    /// this channel.
    pub fn enable(self: &Arc<Self>, name: &str) -> Result<bool> {
        let model = match self.model.get() {
            Some(model) => model,
            None => bail!("model not loaded yet"),
        };

        {
            let mut channels = self.lock_channels();
            let state = channels.entry(name.to_owned()).or_default();
            state.last_polled = Some(Instant::now());
            if state.running {
                return Ok(false);
            }
            state.running = true;
        }

        log::info!("Enabling live classification for {}", name);
        let this = Arc::clone(self);
        let name = name.to_owned();
        tokio::spawn(async move {
            this.run(&name, model).await;
            log::info!("Live classification for {} stopped", name);
        });

        Ok(true)
    }

    /// Latest prediction on channel `name`. Counts as interest in the channel.
    pub fn latest(&self, name: &str) -> Option<Prediction> {
        let mut channels = self.lock_channels();
        let state = channels.get_mut(name)?;
        state.last_polled = Some(Instant::now());
        state.prediction.clone()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock_channels()
            .get(name)
            .map_or(false, |state| state.running)
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelState>> {
        // A panic while holding the lock cannot leave the map inconsistent
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the loop on `name` as stopped if nobody is interested in it anymore.
    ///
    /// Checking and clearing `running` happen under one lock, so a concurrent `enable` either
    /// keeps this loop alive or starts a new one.
    fn stop_if_idle(&self, name: &str, classified_tx: &BytesSender) -> bool {
        let mut channels = self.lock_channels();
        let state = channels.entry(name.to_owned()).or_default();

        let watched = classified_tx.receiver_count() > 0;
        let polled = state
            .last_polled
            .map_or(false, |polled| polled.elapsed() <= self.idle_timeout);
        if watched || polled {
            return false;
        }

        state.running = false;
        true
    }

    fn store(&self, name: &str, prediction: Prediction) {
        self.lock_channels()
            .entry(name.to_owned())
            .or_default()
            .prediction = Some(prediction);
    }

    async fn run(&self, name: &str, model: SharedClassifier) {
        let mut frames_rx = self.pubsub.get_broadcast_receiver(name).await;
        let classified_tx = self
            .pubsub
            .get_broadcast_sender(&classified_channel(name))
            .await;

        loop {
            let frame = tokio::select! {
                frame = latest_frame(&mut frames_rx) => frame,
                _ = tokio::time::sleep(self.idle_timeout) => {
                    if self.stop_if_idle(name, &classified_tx) {
                        log::info!("Nobody watches {} anymore", name);
                        return;
                    }
                    continue;
                }
            };

            let data = match frame {
                Some(data) => data,
                None => {
                    // The sender left, wait for the next one on a fresh channel
                    log::info!("Frame channel {} closed", name);
                    frames_rx = self.pubsub.get_broadcast_receiver(name).await;
                    continue;
                }
            };

            if self.stop_if_idle(name, &classified_tx) {
                log::info!("Nobody watches {} anymore", name);
                return;
            }

            let model = Arc::clone(&model);
            let classified = tokio::task::spawn_blocking(move || {
                classify_frame(&data, |image| model.classify(image))
            })
            .await;

            match classified {
                Ok(Ok((predictions, jpeg))) => {
                    if let Some(top) = predictions.into_iter().next() {
                        log::debug!("{}: {}", name, top.describe());
                        self.store(name, top);
                    }
                    METER.tick_classified();
                    classified_tx.send(jpeg).ok();
                }
                Ok(Err(e)) => log::warn!("Failed to classify frame of {}: {e:#}", name),
                Err(e) => log::error!("Classification of {} panicked: {e}", name),
            }
        }
    }
}

/// Wait for a frame and return the newest one available.
///
/// Returns `None` once the channel is closed.
pub async fn latest_frame(rx: &mut BytesReceiver) -> Option<Bytes> {
    let mut latest = loop {
        match rx.recv().await {
            Ok(data) => break data,
            Err(RecvError::Lagged(skipped)) => log::trace!("Skipped {} frames", skipped),
            Err(RecvError::Closed) => return None,
        }
    };

    loop {
        match rx.try_recv() {
            Ok(data) => latest = data,
            Err(TryRecvError::Lagged(skipped)) => log::trace!("Skipped {} frames", skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Some(latest),
        }
    }
}

/// Decode a JPEG frame, classify it and encode the annotated frame again.
fn classify_frame<F>(data: &[u8], classify: F) -> Result<(Vec<Prediction>, Bytes)>
where
    F: FnOnce(&RgbImage) -> Result<Vec<Prediction>>,
{
    let mut image: RgbImage = turbojpeg::decompress_image(data)?;
    let predictions = classify(&image)?;

    if let Some(top) = predictions.first() {
        draw_confidence_bar(&mut image, top.probability);
    }
    let buf = turbojpeg::compress_image(&image, JPEG_QUALITY, turbojpeg::Subsamp::Sub2x2)?;

    Ok((predictions, Bytes::copy_from_slice(&buf)))
}
