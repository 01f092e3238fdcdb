//! File sink: one JSON object per line for rays and spectra, time series as
//! JSON lines or the whitespace text layout.

use crate::workflow::config::TimeSeriesFormat;
use galileocore::params::RadarParameters;
use galileocore::prelude::{CoreError, CoreResult};
use galileocore::processing::demux::ChannelSet;
use galileocore::processing::spectral::PsdTable;
use galileocore::products::{
    ObservableSet, RayHeader, RaySink, RecordSelection, SpectraHeader, SpectraKind,
};
use galileocore::telemetry::log::LogManager;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct RayLine<'a> {
    #[serde(flatten)]
    header: &'a RayHeader,
    observables: BTreeMap<&'static str, &'a [f32]>,
}

#[derive(Serialize)]
struct SpectraLine<'a> {
    #[serde(flatten)]
    header: &'a SpectraHeader,
    psd: &'a PsdTable,
}

#[derive(Serialize)]
struct TimeSeriesLine<'a> {
    ray_number: u64,
    spectrum: usize,
    channels: &'a ChannelSet,
}

#[derive(Serialize)]
struct RunLine<'a, M: Serialize> {
    run: &'a M,
}

fn sink_error(path: &Path, err: impl std::fmt::Display) -> CoreError {
    CoreError::Sink(format!("{}: {}", path.display(), err))
}

/// Append-only writer bound to one output file.
struct LineFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LineFile {
    fn create(path: PathBuf) -> CoreResult<Self> {
        let file = File::create(&path).map_err(|err| sink_error(&path, err))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    fn json<T: Serialize>(&mut self, value: &T) -> CoreResult<()> {
        serde_json::to_writer(&mut self.writer, value).map_err(|err| sink_error(&self.path, err))?;
        self.line("")
    }

    fn line(&mut self, text: &str) -> CoreResult<()> {
        writeln!(self.writer, "{}", text).map_err(|err| sink_error(&self.path, err))
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.writer.flush().map_err(|err| sink_error(&self.path, err))
    }
}

pub struct JsonLinesSink {
    directory: PathBuf,
    stem: String,
    selection: RecordSelection,
    time_series: TimeSeriesFormat,
    params: RadarParameters,
    rays: LineFile,
    spectra: Option<LineFile>,
    rapid_spectra: Option<LineFile>,
    samples: Option<LineFile>,
    logger: LogManager,
}

impl JsonLinesSink {
    /// Creates `<directory>/<stem>.jsonl` and writes `metadata` as its first
    /// line. Spectra and time-series files are opened on first use.
    pub fn create<M: Serialize>(
        directory: &Path,
        stem: &str,
        selection: RecordSelection,
        time_series: TimeSeriesFormat,
        params: &RadarParameters,
        metadata: &M,
    ) -> CoreResult<Self> {
        fs::create_dir_all(directory).map_err(|err| sink_error(directory, err))?;
        let mut rays = LineFile::create(directory.join(format!("{}.jsonl", stem)))?;
        rays.json(&RunLine { run: metadata })?;
        let logger = LogManager::new("output");
        logger.record(&format!("writing rays to {}", rays.path.display()));
        Ok(Self {
            directory: directory.to_path_buf(),
            stem: stem.to_string(),
            selection,
            time_series,
            params: params.clone(),
            rays,
            spectra: None,
            rapid_spectra: None,
            samples: None,
            logger,
        })
    }

    #[cfg(test)]
    pub fn ray_path(&self) -> &Path {
        &self.rays.path
    }

    fn open(&self, suffix: &str) -> CoreResult<LineFile> {
        let file = LineFile::create(self.directory.join(format!("{}_{}", self.stem, suffix)))?;
        self.logger.record(&format!("opened {}", file.path.display()));
        Ok(file)
    }

    fn time_series_file(&mut self) -> CoreResult<&mut LineFile> {
        if self.samples.is_none() {
            let file = match self.time_series {
                TimeSeriesFormat::Text => {
                    let mut file = self.open("ts.txt")?;
                    let p = &self.params;
                    file.line(&format!("npulse: {}", p.pulses_per_cycle))?;
                    file.line(&format!("nsample: {}", p.time_series_gate_count()))?;
                    file.line(&format!("divfactor: {}", p.clock_divfactor))?;
                    file.line(&format!("delayclocks: {}", p.delay_clocks))?;
                    file.line(&format!("ADC_channels: {}", p.adc_channels))?;
                    file
                }
                _ => self.open("ts.jsonl")?,
            };
            self.samples = Some(file);
        }
        self.samples
            .as_mut()
            .ok_or_else(|| CoreError::Sink("time-series file unavailable".into()))
    }
}

impl RaySink for JsonLinesSink {
    fn write_ray(&mut self, header: &RayHeader, observables: &ObservableSet) -> CoreResult<()> {
        self.rays.json(&RayLine {
            header,
            observables: self.selection.select(observables),
        })
    }

    fn write_spectra(&mut self, header: &SpectraHeader, table: &PsdTable) -> CoreResult<()> {
        let slot = match header.kind {
            SpectraKind::Normal => &mut self.spectra,
            SpectraKind::Rapid => &mut self.rapid_spectra,
        };
        if slot.is_none() {
            let suffix = match header.kind {
                SpectraKind::Normal => "spectra.jsonl",
                SpectraKind::Rapid => "spectra-rapid.jsonl",
            };
            let path = self.directory.join(format!("{}_{}", self.stem, suffix));
            self.logger.record(&format!("opened {}", path.display()));
            *slot = Some(LineFile::create(path)?);
        }
        match slot {
            Some(file) => file.json(&SpectraLine { header, psd: table }),
            None => Err(CoreError::Sink("spectra file unavailable".into())),
        }
    }

    fn write_time_series(
        &mut self,
        ray_number: u64,
        spectrum: usize,
        channels: &ChannelSet,
    ) -> CoreResult<()> {
        match self.time_series {
            TimeSeriesFormat::Off => Ok(()),
            TimeSeriesFormat::Jsonl => self.time_series_file()?.json(&TimeSeriesLine {
                ray_number,
                spectrum,
                channels,
            }),
            TimeSeriesFormat::Text => {
                let file = self.time_series_file()?;
                file.line(&format!("Ray_number: {}, {}", ray_number, spectrum))?;
                let pulses = channels.pulses();
                for pulse in 0..pulses {
                    let index = pulse + spectrum * pulses;
                    for gate in 0..channels.gates() {
                        let at = [pulse, gate];
                        file.line(&format!(
                            "{} {} {} {} {} {} {} {} {}",
                            index,
                            gate,
                            channels.i_co[at],
                            channels.q_co[at],
                            channels.i_cross[at],
                            channels.q_cross[at],
                            channels.tx_power1[at],
                            channels.tx_power2[at],
                            channels.polarity[at]
                        ))?;
                    }
                }
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.rays.flush()?;
        for file in [&mut self.spectra, &mut self.rapid_spectra, &mut self.samples]
            .into_iter()
            .flatten()
        {
            file.flush()?;
        }
        Ok(())
    }
}
