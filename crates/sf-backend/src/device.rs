//! Default output device (cpal)
//!
//! The cpal stream lives on its own thread; rendered blocks arrive through a
//! lock-free SPSC ring (rtrb) so the audio callback never takes a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::{BackendError, BackendResult};

/// Running output stream
pub(crate) struct DeviceOutput {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default device and return the producer side of its ring
    pub(crate) fn start(
        sample_rate: u32,
        channels: u16,
        capacity: usize,
    ) -> BackendResult<(Self, Producer<f32>)> {
        let (producer, consumer) = RingBuffer::<f32>::new(capacity.max(channels as usize));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::clone(&stop);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let handle = thread::Builder::new()
            .name("sf-device-output".into())
            .spawn(move || {
                run_output_stream(consumer, channels as usize, stop_signal, ready_tx);
            })
            .map_err(|e| BackendError::Device(e.to_string()))?;

        let output = Self {
            stop,
            handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "[DeviceOutput] Streaming mix at {} Hz, {} channels",
                    sample_rate,
                    channels
                );
                Ok((output, producer))
            }
            Ok(Err(e)) => {
                let mut output = output;
                output.stop();
                Err(BackendError::Device(e))
            }
            Err(_) => Err(BackendError::Device("output thread exited".into())),
        }
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_output_stream(
    mut consumer: Consumer<f32>,
    mix_channels: usize,
    stop_signal: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let stream = match build_stream(move |data: &mut [f32], device_channels: usize| {
        // Remap mix frames onto device frames, silence on underrun
        for frame in data.chunks_mut(device_channels) {
            let mut last = 0.0;
            for ch in 0..mix_channels {
                let sample = consumer.pop().unwrap_or(0.0);
                if let Some(out) = frame.get_mut(ch) {
                    *out = sample;
                }
                last = sample;
            }
            for out in frame.iter_mut().skip(mix_channels) {
                *out = last;
            }
        }
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = ready.send(Ok(()));

    while !stop_signal.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    log::info!("[DeviceOutput] Stream stopped");
}

fn build_stream<F>(mut fill: F) -> Result<cpal::Stream, String>
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("No audio output device found")?;

    let config = device
        .default_output_config()
        .map_err(|e| format!("Failed to get audio config: {}", e))?;
    let device_channels = config.channels() as usize;

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill(data, device_channels);
            },
            |err| {
                log::error!("[DeviceOutput] Stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("Failed to build stream: {}", e))?;

    stream
        .play()
        .map_err(|e| format!("Failed to play stream: {}", e))?;

    Ok(stream)
}
