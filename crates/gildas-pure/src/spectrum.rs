//! In-memory CLASS spectrum.
//!
//! A [`SpectrumRecord`] owns the fifteen-field entry header, the flattened
//! section parameters and the channel intensities. Array index 0 holds
//! channel 1: every public method taking a channel number uses the format's
//! 1-based numbering, possibly fractional.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::codec::GildasDate;
use crate::entry::{DataKind, SpectrumHeader};
use crate::error::{Error, Result};
use crate::parameter::{keys, ParameterTable};
use crate::spline::CubicSpline;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// The four header quantities every channel conversion derives from.
///
/// Velocities are in km/s and frequencies in MHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralAxis {
    pub ref_chan: f64,
    pub ref_vel: f64,
    pub vel_resol: f64,
    pub ref_freq: f64,
}

impl SpectralAxis {
    /// Build an axis, rejecting a zero velocity resolution or reference
    /// frequency.
    pub fn new(ref_chan: f64, ref_vel: f64, vel_resol: f64, ref_freq: f64) -> Result<Self> {
        if vel_resol == 0.0 || !vel_resol.is_finite() {
            return Err(Error::InvalidValue("velocity resolution must be non-zero"));
        }
        if ref_freq == 0.0 || !ref_freq.is_finite() {
            return Err(Error::Format("reference frequency must be non-zero"));
        }
        Ok(SpectralAxis {
            ref_chan,
            ref_vel,
            vel_resol,
            ref_freq,
        })
    }

    /// Frequency resolution implied by the velocity resolution.
    pub fn freq_resol(&self) -> f64 {
        -self.vel_resol * self.ref_freq / SPEED_OF_LIGHT_KMS
    }

    /// Classical velocity of a (1-based, possibly fractional) channel.
    pub fn velocity(&self, channel: f64) -> f64 {
        self.ref_vel + (channel - self.ref_chan) * self.vel_resol
    }

    pub fn channel_of_velocity(&self, velocity: f64) -> f64 {
        self.ref_chan + (velocity - self.ref_vel) / self.vel_resol
    }

    /// Frequency of a classical velocity.
    pub fn frequency(&self, velocity: f64) -> f64 {
        self.ref_freq + ((velocity - self.ref_vel) / self.vel_resol) * self.freq_resol()
    }

    /// Classical velocity of a frequency; inverse of [`SpectralAxis::frequency`].
    pub fn velocity_of_frequency(&self, frequency: f64) -> f64 {
        self.ref_vel + (frequency - self.ref_freq) / self.freq_resol() * self.vel_resol
    }

    /// Relativistically corrected velocity of a frequency.
    pub fn relativistic_velocity(&self, frequency: f64) -> f64 {
        self.ref_vel - (1.0 - self.ref_freq / frequency) * SPEED_OF_LIGHT_KMS
    }

    /// Frequency of a relativistically corrected velocity.
    pub fn frequency_of_relativistic_velocity(&self, velocity: f64) -> f64 {
        self.ref_freq / (1.0 - (self.ref_vel - velocity) / SPEED_OF_LIGHT_KMS)
    }

    pub fn channel_frequency(&self, channel: f64) -> f64 {
        self.frequency(self.velocity(channel))
    }

    pub fn channel_of_frequency(&self, frequency: f64) -> f64 {
        self.channel_of_velocity(self.velocity_of_frequency(frequency))
    }
}

/// One spectrum: header, parameters and channel intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumRecord {
    header: SpectrumHeader,
    params: ParameterTable,
    data: Vec<f32>,
}

impl SpectrumRecord {
    /// Assemble a record, checking the NCHAN invariant.
    ///
    /// A missing NCHAN is filled in from the data length.
    pub fn new(header: SpectrumHeader, mut params: ParameterTable, data: Vec<f32>) -> Result<Self> {
        match params.get_i64(keys::NCHAN) {
            Some(n) if n != data.len() as i64 => {
                return Err(Error::InvalidValue("NCHAN does not match channel count"))
            }
            Some(_) => {}
            None => params.set_i64(keys::NCHAN, data.len() as i64),
        }
        Ok(SpectrumRecord {
            header,
            params,
            data,
        })
    }

    /// Build a spectral-line record from scratch.
    pub fn from_axis(
        header: SpectrumHeader,
        axis: SpectralAxis,
        data: Vec<f32>,
    ) -> Self {
        let mut params = ParameterTable::new();
        params.set_text(keys::SOURCE, &header.source);
        params.set_text(keys::LINE, &header.line);
        params.set_i64(keys::NCHAN, data.len() as i64);
        params.set_f64(keys::REF_CHAN, axis.ref_chan);
        params.set_f64(keys::REF_VEL, axis.ref_vel);
        params.set_f64(keys::VEL_RESOL, axis.vel_resol);
        params.set_f64(keys::REF_FREQ, axis.ref_freq);
        params.set_f64(keys::FREQ_RESOL, axis.freq_resol());
        SpectrumRecord {
            header,
            params,
            data,
        }
    }

    pub fn header(&self) -> &SpectrumHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut SpectrumHeader {
        &mut self.header
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    /// Mutable parameters. NCHAN is owned by the record and restored on
    /// every data change; edit channels through [`SpectrumRecord::set_data`].
    pub fn params_mut(&mut self) -> &mut ParameterTable {
        &mut self.params
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Replace the channel array, keeping NCHAN in step.
    pub fn set_data(&mut self, data: Vec<f32>) {
        self.params.set_i64(keys::NCHAN, data.len() as i64);
        self.data = data;
    }

    pub fn into_parts(self) -> (SpectrumHeader, ParameterTable, Vec<f32>) {
        (self.header, self.params, self.data)
    }

    pub fn nchan(&self) -> usize {
        self.data.len()
    }

    pub fn observation_number(&self) -> i32 {
        self.header.observation
    }

    pub fn kind(&self) -> DataKind {
        self.header.kind
    }

    pub fn observation_date(&self) -> GildasDate {
        self.header.observed
    }

    /// Blanking sentinel, if the record declares one.
    pub fn blanking(&self) -> Option<f32> {
        self.params.get_f64(keys::BLANKING).map(|b| b as f32)
    }

    /// True for blanked or non-finite samples.
    pub fn is_blank(&self, value: f32) -> bool {
        !value.is_finite() || self.blanking().is_some_and(|b| b != 0.0 && value == b)
    }

    /// Spectral axis built from REF_CHAN, REF_VEL, VEL_RESOL and REF_FREQ.
    pub fn axis(&self) -> Result<SpectralAxis> {
        SpectralAxis::new(
            self.params.require_f64(keys::REF_CHAN)?,
            self.params.get_f64(keys::REF_VEL).unwrap_or(0.0),
            self.params.require_f64(keys::VEL_RESOL)?,
            self.params.require_f64(keys::REF_FREQ)?,
        )
    }

    /// Install a new spectral axis into the parameter table.
    pub fn set_axis(&mut self, axis: SpectralAxis) {
        self.params.set_f64(keys::REF_CHAN, axis.ref_chan);
        self.params.set_f64(keys::REF_VEL, axis.ref_vel);
        self.params.set_f64(keys::VEL_RESOL, axis.vel_resol);
        self.params.set_f64(keys::REF_FREQ, axis.ref_freq);
        self.params.set_f64(keys::FREQ_RESOL, axis.freq_resol());
    }

    pub fn channel_to_velocity(&self, channel: f64) -> Result<f64> {
        Ok(self.axis()?.velocity(channel))
    }

    pub fn velocity_to_channel(&self, velocity: f64) -> Result<f64> {
        Ok(self.axis()?.channel_of_velocity(velocity))
    }

    pub fn velocity_to_frequency(&self, velocity: f64) -> Result<f64> {
        Ok(self.axis()?.frequency(velocity))
    }

    pub fn frequency_to_velocity(&self, frequency: f64) -> Result<f64> {
        Ok(self.axis()?.velocity_of_frequency(frequency))
    }

    pub fn channel_to_frequency(&self, channel: f64) -> Result<f64> {
        Ok(self.axis()?.channel_frequency(channel))
    }

    pub fn frequency_to_channel(&self, frequency: f64) -> Result<f64> {
        Ok(self.axis()?.channel_of_frequency(frequency))
    }

    pub fn relativistic_velocity(&self, frequency: f64) -> Result<f64> {
        Ok(self.axis()?.relativistic_velocity(frequency))
    }

    /// Velocity of every channel, in array order.
    pub fn velocity_axis(&self) -> Result<Vec<f64>> {
        let axis = self.axis()?;
        Ok((1..=self.nchan()).map(|c| axis.velocity(c as f64)).collect())
    }

    /// Frequency of every channel, in array order.
    pub fn frequency_axis(&self) -> Result<Vec<f64>> {
        let axis = self.axis()?;
        Ok((1..=self.nchan())
            .map(|c| axis.channel_frequency(c as f64))
            .collect())
    }

    /// Intensity at a 1-based channel number.
    pub fn value_at_channel(&self, channel: usize) -> Result<f32> {
        if channel == 0 || channel > self.data.len() {
            return Err(Error::ChannelRange {
                index: channel,
                len: self.data.len(),
            });
        }
        Ok(self.data[channel - 1])
    }

    /// Copy of channels `first..=last` (1-based) with the axis re-referenced.
    pub fn channel_range(&self, first: usize, last: usize) -> Result<SpectrumRecord> {
        let n = self.data.len();
        if first == 0 || first > n {
            return Err(Error::ChannelRange { index: first, len: n });
        }
        if last < first || last > n {
            return Err(Error::ChannelRange { index: last, len: n });
        }
        let mut out = self.clone();
        out.set_data(self.data[first - 1..last].to_vec());
        if let Some(rc) = self.params.get_f64(keys::REF_CHAN) {
            out.params.set_f64(keys::REF_CHAN, rc - (first as f64 - 1.0));
        }
        Ok(out)
    }

    /// Multiply every non-blank channel by `factor`.
    pub fn scale(&mut self, factor: f32) {
        let blank = self.blanking();
        for v in &mut self.data {
            if v.is_finite() && Some(*v) != blank {
                *v *= factor;
            }
        }
    }

    /// Root mean square of the non-blank channels.
    pub fn rms(&self) -> Option<f64> {
        let (sum, n) = self
            .data
            .iter()
            .filter(|v| !self.is_blank(**v))
            .fold((0.0f64, 0usize), |(s, n), &v| (s + (v as f64).powi(2), n + 1));
        (n > 0).then(|| (sum / n as f64).sqrt())
    }

    /// Average every `factor` adjacent channels into one.
    ///
    /// Trailing channels that do not fill a whole group are dropped. The axis
    /// is rescaled so that channel centers keep their velocities.
    pub fn smooth(&mut self, factor: usize) -> Result<()> {
        if factor == 0 {
            return Err(Error::InvalidValue("smoothing factor must be positive"));
        }
        if factor == 1 {
            return Ok(());
        }
        let axis = self.axis()?;
        let n = self.data.len() / factor;
        if n == 0 {
            return Err(Error::InvalidValue("smoothing factor exceeds channel count"));
        }
        let blank = self.blanking().unwrap_or(f32::NAN);
        let mut out = Vec::with_capacity(n);
        for group in self.data.chunks_exact(factor).take(n) {
            let (sum, cnt) = group
                .iter()
                .filter(|v| !self.is_blank(**v))
                .fold((0.0f64, 0usize), |(s, c), &v| (s + v as f64, c + 1));
            out.push(if cnt == 0 { blank } else { (sum / cnt as f64) as f32 });
        }
        let f = factor as f64;
        let new_axis = SpectralAxis::new(
            (axis.ref_chan - 0.5) / f + 0.5,
            axis.ref_vel,
            axis.vel_resol * f,
            axis.ref_freq,
        )?;
        self.set_axis(new_axis);
        self.set_data(out);
        Ok(())
    }

    /// Interpolate onto a new velocity grid with a natural cubic spline.
    ///
    /// Channels falling outside the original velocity coverage are blanked.
    pub fn resample_to_velocity_grid(&self, target: SpectralAxis, nchan: usize) -> Result<SpectrumRecord> {
        let axis = self.axis()?;
        let blank = self.blanking().unwrap_or(f32::NAN);
        let mut xs = Vec::with_capacity(self.nchan());
        let mut ys = Vec::with_capacity(self.nchan());
        let mut order: Vec<usize> = (0..self.nchan()).collect();
        if axis.vel_resol < 0.0 {
            order.reverse();
        }
        for i in order {
            let v = self.data[i];
            if !self.is_blank(v) {
                xs.push(axis.velocity(i as f64 + 1.0));
                ys.push(v as f64);
            }
        }
        let spline = CubicSpline::new(&xs, &ys)?;
        let data = (1..=nchan)
            .map(|c| {
                let v = target.velocity(c as f64);
                spline.eval_inside(v).map(|y| y as f32).unwrap_or(blank)
            })
            .collect();
        let mut out = self.clone();
        out.set_axis(target);
        out.set_data(data);
        Ok(out)
    }

    /// Format-independent view of this spectrum.
    pub fn to_generic(&self) -> Result<GenericSpectrum> {
        let axis = self.axis()?;
        let p = &self.params;
        Ok(GenericSpectrum {
            source: self.header.source.clone(),
            line: self.header.line.clone(),
            telescope: self.header.telescope.clone(),
            observation_number: self.header.observation as i64,
            scan: self.header.scan as i64,
            observation_mjd: self.header.observed.mjd(),
            rest_frequency: axis.ref_freq,
            reference_channel: axis.ref_chan,
            reference_velocity: axis.ref_vel,
            velocity_resolution: axis.vel_resol,
            frequency_resolution: p.get_f64(keys::FREQ_RESOL).unwrap_or(axis.freq_resol()),
            image_frequency: p.get_f64(keys::IMAGE_FREQ).unwrap_or(0.0),
            lambda: p.get_f64(keys::LAMBDA).unwrap_or(0.0),
            beta: p.get_f64(keys::BETA).unwrap_or(0.0),
            offset_lambda: self.header.offset1 as f64,
            offset_beta: self.header.offset2 as f64,
            epoch: p.get_f64(keys::EPOCH).unwrap_or(2000.0),
            integration_time: p.get_f64(keys::INTEGRATION_TIME).unwrap_or(0.0),
            system_temperature: p.get_f64(keys::TSYS).unwrap_or(0.0),
            beam_efficiency: p.get_f64(keys::BEAM_EFF),
            blanking: p.get_f64(keys::BLANKING),
            intensities: self.data.iter().map(|&v| v as f64).collect(),
        })
    }

    /// Rebuild a CLASS record from a format-independent spectrum.
    pub fn from_generic(g: &GenericSpectrum) -> Result<SpectrumRecord> {
        let axis = SpectralAxis::new(
            g.reference_channel,
            g.reference_velocity,
            g.velocity_resolution,
            g.rest_frequency,
        )?;
        let header = SpectrumHeader {
            observation: g.observation_number as i32,
            source: g.source.clone(),
            line: g.line.clone(),
            telescope: g.telescope.clone(),
            observed: GildasDate::from_mjd(g.observation_mjd),
            offset1: g.offset_lambda as f32,
            offset2: g.offset_beta as f32,
            scan: g.scan as i32,
            ..SpectrumHeader::default()
        };
        let data = g.intensities.iter().map(|&v| v as f32).collect();
        let mut rec = SpectrumRecord::from_axis(header, axis, data);
        let p = &mut rec.params;
        p.set_f64(keys::FREQ_RESOL, g.frequency_resolution);
        p.set_f64(keys::IMAGE_FREQ, g.image_frequency);
        p.set_f64(keys::LAMBDA, g.lambda);
        p.set_f64(keys::BETA, g.beta);
        p.set_f64(keys::LAMBDA_OFFSET, g.offset_lambda);
        p.set_f64(keys::BETA_OFFSET, g.offset_beta);
        p.set_f64(keys::EPOCH, g.epoch);
        p.set_f64(keys::INTEGRATION_TIME, g.integration_time);
        p.set_f64(keys::TSYS, g.system_temperature);
        if let Some(eff) = g.beam_efficiency {
            p.set_f64(keys::BEAM_EFF, eff);
        }
        if let Some(b) = g.blanking {
            p.set_f64(keys::BLANKING, b);
        }
        Ok(rec)
    }
}

/// A spectrum described independently of any file format.
///
/// Velocities in km/s, frequencies in MHz, angles in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSpectrum {
    pub source: String,
    pub line: String,
    pub telescope: String,
    pub observation_number: i64,
    pub scan: i64,
    pub observation_mjd: i64,
    pub rest_frequency: f64,
    pub reference_channel: f64,
    pub reference_velocity: f64,
    pub velocity_resolution: f64,
    pub frequency_resolution: f64,
    pub image_frequency: f64,
    pub lambda: f64,
    pub beta: f64,
    pub offset_lambda: f64,
    pub offset_beta: f64,
    pub epoch: f64,
    pub integration_time: f64,
    pub system_temperature: f64,
    pub beam_efficiency: Option<f64>,
    pub blanking: Option<f64>,
    pub intensities: Vec<f64>,
}

impl GenericSpectrum {
    /// Short one-line label, e.g. `ORION-KL CO(1-0) #12`.
    pub fn label(&self) -> String {
        let mut s = self.source.to_string();
        if !self.line.is_empty() {
            s.push(' ');
            s.push_str(&self.line);
        }
        s.push_str(&alloc::format!(" #{}", self.observation_number));
        s
    }
}
