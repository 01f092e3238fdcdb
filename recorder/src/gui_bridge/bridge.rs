use crate::gui_bridge::model::{QuicklookModel, RayView};
use anyhow::{anyhow, Context};
use galileocore::prelude::CoreResult;
use galileocore::processing::demux::ChannelSet;
use galileocore::processing::spectral::PsdTable;
use galileocore::products::{ObservableSet, RayHeader, RaySink, SpectraHeader};
use galileocore::telemetry::log::LogManager;
use galileocore::telemetry::MetricsRecorder;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{mpsc, Arc, RwLock},
    thread,
};
use tokio::runtime::Builder;
use warp::Filter;

/// Holds the latest ray and serves it, with the run counters, over HTTP.
#[derive(Clone)]
pub struct QuicklookBridge {
    state: Arc<RwLock<QuicklookModel>>,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl QuicklookBridge {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            state: Arc::new(RwLock::new(QuicklookModel::default())),
            metrics,
            logger: LogManager::new("quicklook"),
        }
    }

    /// Starts `/ray` and `/status` on a background thread and returns the
    /// bound address once the listener is up.
    pub fn serve(&self, addr: SocketAddr) -> anyhow::Result<SocketAddr> {
        let ray_state = self.state.clone();
        let ray_route = warp::path("ray")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let model = ray_state.read().map(|m| m.clone()).unwrap_or_default();
                warp::reply::json(&model)
            });

        let status_state = self.state.clone();
        let metrics = self.metrics.clone();
        let status_route = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let status = status_state
                    .read()
                    .map(|m| m.status.clone())
                    .unwrap_or_default();
                warp::reply::json(&json!({
                    "status": status,
                    "metrics": metrics.snapshot(),
                }))
            });

        let (bound_tx, bound_rx) = mpsc::channel();
        thread::Builder::new()
            .name("quicklook".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = bound_tx.send(Err(anyhow!("building quicklook runtime: {}", err)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let routes = ray_route.or(status_route);
                    match warp::serve(routes).try_bind_ephemeral(addr) {
                        Ok((bound, server)) => {
                            let _ = bound_tx.send(Ok(bound));
                            server.await;
                        }
                        Err(err) => {
                            let _ = bound_tx.send(Err(anyhow!("binding {}: {}", addr, err)));
                        }
                    }
                });
            })
            .context("spawning quicklook thread")?;

        let bound = bound_rx
            .recv()
            .context("quicklook thread exited before binding")??;
        self.logger
            .record(&format!("quicklook endpoint on http://{}", bound));
        Ok(bound)
    }

    pub fn publish(&self, view: RayView) {
        match self.state.write() {
            Ok(mut model) => model.ray = Some(view),
            Err(_) => self.logger.warn("quicklook state poisoned, ray not published"),
        }
    }

    pub fn publish_status(&self, message: &str) {
        if let Ok(mut model) = self.state.write() {
            model.status = message.to_string();
        }
        self.logger.record(message);
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> QuicklookModel {
        self.state.read().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Forwards to the wrapped sink, then publishes each written ray.
pub struct QuicklookSink<S: RaySink> {
    inner: S,
    bridge: QuicklookBridge,
}

impl<S: RaySink> QuicklookSink<S> {
    pub fn new(inner: S, bridge: QuicklookBridge) -> Self {
        Self { inner, bridge }
    }
}

impl<S: RaySink> RaySink for QuicklookSink<S> {
    fn write_ray(&mut self, header: &RayHeader, observables: &ObservableSet) -> CoreResult<()> {
        self.inner.write_ray(header, observables)?;
        self.bridge.publish(RayView::from_ray(header, observables));
        Ok(())
    }

    fn write_spectra(&mut self, header: &SpectraHeader, table: &PsdTable) -> CoreResult<()> {
        self.inner.write_spectra(header, table)
    }

    fn write_time_series(
        &mut self,
        ray_number: u64,
        spectrum: usize,
        channels: &ChannelSet,
    ) -> CoreResult<()> {
        self.inner.write_time_series(ray_number, spectrum, channels)
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use galileocore::acquisition::AntennaPosition;
    use galileocore::processing::demux::Polarity;
    use galileocore::processing::mode::{ModeSlot, PulseMode};
    use galileocore::products::Observable;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        rays: usize,
    }

    impl RaySink for CountingSink {
        fn write_ray(&mut self, _header: &RayHeader, _observables: &ObservableSet) -> CoreResult<()> {
            self.rays += 1;
            Ok(())
        }
    }

    fn header(ray_number: u64) -> RayHeader {
        let now = Utc::now();
        RayHeader {
            ray_number,
            slot: ModeSlot::Mode1,
            mode: PulseMode::SingleH,
            polarity: Polarity::HorizontalFirst,
            start: now,
            end: now,
            position: AntennaPosition {
                azimuth_deg: 90.0,
                elevation_deg: 45.0,
                timestamp: now,
            },
            hardware_faults: 2,
        }
    }

    #[test]
    fn quicklook_sink_publishes_after_inner_write() {
        let bridge = QuicklookBridge::new(Arc::new(MetricsRecorder::new()));
        let mut sink = QuicklookSink::new(CountingSink::default(), bridge.clone());
        let mut observables = ObservableSet::new(16).unwrap();
        observables.get_mut(Observable::ZedHc)[2] = -12.5;
        sink.write_ray(&header(4), &observables).unwrap();

        assert_eq!(sink.inner.rays, 1);
        let ray = bridge.snapshot().ray.unwrap();
        assert_eq!(ray.ray_number, 4);
        assert_eq!(ray.hardware_faults, 2);
        assert_eq!(ray.profiles["ZED_HC"][2], -12.5);
        assert_eq!(ray.profiles.len(), 5);
    }

    #[test]
    fn status_endpoint_reports_metrics() {
        let metrics = Arc::new(MetricsRecorder::new());
        metrics.record_ray();
        let bridge = QuicklookBridge::new(metrics);
        bridge.publish_status("recording");
        let addr = bridge
            .serve(SocketAddr::from(([127, 0, 0, 1], 0)))
            .unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"recording\""));
        assert!(response.contains("\"rays_written\":1"));
    }
}
