//! GILDAS image cubes: reading, writing and pixel-grid operations.
//!
//! A [`CubeRecord`] is either backed by a file, in which case planes are
//! streamed from disk on demand, or materialized as an in-memory volume
//! indexed `[plane, row, column]`. Every mutating operation materializes the
//! cube first and refreshes the header's extrema afterwards.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, ArrayView2, Axis};

use crate::block::CUBE_HEADER_SIZE;
use crate::codec::{ByteCodec, Codec, Encoding};
use crate::cube_header::{AxisFormula, CubeHeader};
use crate::error::{Error, Result};
use crate::kernel::{AnomalyLog, ConvolutionOptions, Kernel};
use crate::spline::resample_uniform;

/// Where the samples of a cube live.
#[derive(Debug, Clone, PartialEq)]
pub enum CubeData {
    /// Nothing loaded; planes are read from this path when needed.
    FileBacked(PathBuf),
    /// The full volume, indexed `[plane, row, column]`.
    Materialized(Array3<f32>),
}

/// A position-velocity cut through a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct PvStrip {
    /// Distance along the path of each sample (radians).
    pub offsets: Vec<f64>,
    /// World offsets `(x, y)` of each sample.
    pub positions: Vec<(f64, f64)>,
    /// Spectra indexed `[sample, channel]`.
    pub data: Array2<f32>,
}

/// An image cube with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeRecord {
    header: CubeHeader,
    data: CubeData,
}

/// Sequential plane reader over a cube file.
struct PlaneReader {
    file: File,
    file_len: u64,
    codec: Codec,
    plane_len: usize,
    nz: usize,
}

impl PlaneReader {
    fn open(path: &Path, header: &CubeHeader) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(PlaneReader {
            file,
            file_len,
            codec: Codec::for_encoding(header.encoding),
            plane_len: header.plane_len(),
            nz: header.nz(),
        })
    }

    fn read_values(&mut self, record: usize, first: usize, count: usize) -> Result<Vec<f32>> {
        let offset = (CUBE_HEADER_SIZE + first * 4) as u64;
        let end = offset + (count * 4) as u64;
        if end > self.file_len {
            return Err(Error::CorruptOffset {
                record,
                offset: end,
                file_len: self.file_len,
            });
        }
        let mut raw = vec![0u8; count * 4];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut raw)?;
        self.codec.read_f32_array(&raw, 0, count)
    }

    fn read_plane(&mut self, k: usize, ny: usize, nx: usize) -> Result<Array2<f32>> {
        if k >= self.nz {
            return Err(Error::ChannelRange { index: k, len: self.nz });
        }
        let values = self.read_values(k, k * self.plane_len, self.plane_len)?;
        Array2::from_shape_vec((ny, nx), values)
            .map_err(|_| Error::InvalidValue("plane size does not match the header"))
    }
}

impl CubeRecord {
    /// Wrap an in-memory volume; its shape must be `(nz, ny, nx)` of the header.
    pub fn new(mut header: CubeHeader, volume: Array3<f32>) -> Result<Self> {
        let (nz, ny, nx) = volume.dim();
        if (nx, ny, nz) != (header.nx(), header.ny(), header.nz()) {
            return Err(Error::InvalidValue("volume shape does not match the header"));
        }
        header.set_dims(nx, ny, nz);
        let mut cube = CubeRecord {
            header,
            data: CubeData::Materialized(volume),
        };
        cube.recompute_extrema();
        Ok(cube)
    }

    /// Build a cube with unit axis formulas around `volume`.
    pub fn from_volume(encoding: Encoding, volume: Array3<f32>) -> Result<Self> {
        let (nz, ny, nx) = volume.dim();
        Self::new(CubeHeader::new(encoding, nx, ny, nz), volume)
    }

    /// Open a cube file, reading only its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut buf = [0u8; CUBE_HEADER_SIZE];
        file.read_exact(&mut buf)
            .map_err(|_| Error::Format("cube shorter than its header"))?;
        let header = CubeHeader::parse(&buf)?;
        let needed = header
            .data_bytes()
            .and_then(|n| n.checked_add(CUBE_HEADER_SIZE))
            .map_or(u64::MAX, |n| n as u64);
        if needed > file_len {
            return Err(Error::CorruptOffset {
                record: 0,
                offset: needed,
                file_len,
            });
        }
        log::debug!(
            "opened cube {} ({}x{}x{}, {:?})",
            path.display(),
            header.nx(),
            header.ny(),
            header.nz(),
            header.encoding
        );
        Ok(CubeRecord {
            header,
            data: CubeData::FileBacked(path.to_path_buf()),
        })
    }

    /// Open a cube file and load the whole volume.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let mut cube = Self::open(path)?;
        cube.materialize()?;
        Ok(cube)
    }

    /// Decode a complete cube held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = CubeHeader::parse(bytes)?;
        let end = header
            .data_bytes()
            .and_then(|n| n.checked_add(CUBE_HEADER_SIZE))
            .filter(|&end| end <= bytes.len())
            .ok_or(Error::CorruptOffset {
                record: 0,
                offset: header.data_bytes().map_or(u64::MAX, |n| n as u64),
                file_len: bytes.len() as u64,
            })?;
        let n = (end - CUBE_HEADER_SIZE) / 4;
        let codec = Codec::for_encoding(header.encoding);
        let values = codec.read_f32_array(bytes, CUBE_HEADER_SIZE, n)?;
        let volume = Array3::from_shape_vec((header.nz(), header.ny(), header.nx()), values)
            .map_err(|_| Error::InvalidValue("volume shape does not match the header"))?;
        Ok(CubeRecord {
            header,
            data: CubeData::Materialized(volume),
        })
    }

    pub fn header(&self) -> &CubeHeader {
        &self.header
    }

    /// Mutable header. Dimensions must keep matching the data.
    pub fn header_mut(&mut self) -> &mut CubeHeader {
        &mut self.header
    }

    pub fn data(&self) -> &CubeData {
        &self.data
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.data, CubeData::Materialized(_))
    }

    pub fn backing_path(&self) -> Option<&Path> {
        match &self.data {
            CubeData::FileBacked(p) => Some(p),
            CubeData::Materialized(_) => None,
        }
    }

    /// In-memory volume, if materialized.
    pub fn volume(&self) -> Option<&Array3<f32>> {
        match &self.data {
            CubeData::Materialized(v) => Some(v),
            CubeData::FileBacked(_) => None,
        }
    }

    /// Load the volume from disk if needed and return it.
    pub fn materialize(&mut self) -> Result<&mut Array3<f32>> {
        if let CubeData::FileBacked(path) = &self.data {
            let volume = self.read_volume(path)?;
            self.data = CubeData::Materialized(volume);
        }
        match &mut self.data {
            CubeData::Materialized(v) => Ok(v),
            CubeData::FileBacked(_) => Err(Error::InvalidValue("cube could not be materialized")),
        }
    }

    /// Drop the in-memory volume and go back to reading `path`.
    ///
    /// The header is re-read from the file so it describes what is on disk.
    pub fn reset_backing_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let reopened = Self::open(path)?;
        *self = reopened;
        Ok(())
    }

    /// Copy of the volume, read from disk when file-backed.
    pub fn to_volume(&self) -> Result<Array3<f32>> {
        match &self.data {
            CubeData::Materialized(v) => Ok(v.clone()),
            CubeData::FileBacked(path) => self.read_volume(path),
        }
    }

    fn read_volume(&self, path: &Path) -> Result<Array3<f32>> {
        let h = &self.header;
        let mut reader = PlaneReader::open(path, h)?;
        let values = reader.read_values(0, 0, h.plane_len() * h.nz())?;
        Array3::from_shape_vec((h.nz(), h.ny(), h.nx()), values)
            .map_err(|_| Error::InvalidValue("volume shape does not match the header"))
    }

    fn check_pixel(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.header.nx() {
            return Err(Error::ChannelRange {
                index: i,
                len: self.header.nx(),
            });
        }
        if j >= self.header.ny() {
            return Err(Error::ChannelRange {
                index: j,
                len: self.header.ny(),
            });
        }
        Ok(())
    }

    /// One velocity plane (0-based), indexed `[row, column]`.
    pub fn plane(&self, k: usize) -> Result<Array2<f32>> {
        let nz = self.header.nz();
        if k >= nz {
            return Err(Error::ChannelRange { index: k, len: nz });
        }
        match &self.data {
            CubeData::Materialized(v) => Ok(v.index_axis(Axis(0), k).to_owned()),
            CubeData::FileBacked(path) => PlaneReader::open(path, &self.header)?.read_plane(
                k,
                self.header.ny(),
                self.header.nx(),
            ),
        }
    }

    /// Spectrum through pixel `(i, j)` (0-based column and row).
    pub fn spectrum_at(&self, i: usize, j: usize) -> Result<Vec<f32>> {
        self.check_pixel(i, j)?;
        match &self.data {
            CubeData::Materialized(v) => Ok(v.slice(s![.., j, i]).to_vec()),
            CubeData::FileBacked(path) => {
                let mut reader = PlaneReader::open(path, &self.header)?;
                let idx = j * self.header.nx() + i;
                (0..self.header.nz())
                    .map(|k| Ok(reader.read_values(k, k * self.header.plane_len() + idx, 1)?[0]))
                    .collect()
            }
        }
    }

    /// World coordinates of the 0-based voxel `(i, j, k)`.
    pub fn world_at(&self, i: usize, j: usize, k: usize) -> (f64, f64, f64) {
        let a = &self.header.axes;
        (
            a[0].world(i as f64 + 1.0),
            a[1].world(j as f64 + 1.0),
            a[2].world(k as f64 + 1.0),
        )
    }

    /// Fractional 0-based voxel position of world coordinates `(x, y, v)`.
    pub fn pixel_of(&self, x: f64, y: f64, v: f64) -> (f64, f64, f64) {
        let a = &self.header.axes;
        (a[0].pixel(x) - 1.0, a[1].pixel(y) - 1.0, a[2].pixel(v) - 1.0)
    }

    /// World value of every plane along the third axis.
    pub fn velocity_axis(&self) -> Vec<f64> {
        let f = self.header.axes[2];
        (1..=self.header.nz()).map(|k| f.world(k as f64)).collect()
    }

    /// Refresh min/max and their 1-based positions from the data.
    pub fn recompute_extrema(&mut self) {
        let CubeData::Materialized(volume) = &self.data else {
            return;
        };
        let mut best: Option<(f32, [usize; 3], f32, [usize; 3])> = None;
        for ((k, j, i), &v) in volume.indexed_iter() {
            if !v.is_finite() || self.header.is_blank(v) {
                continue;
            }
            let pos = [i, j, k];
            best = Some(match best {
                None => (v, pos, v, pos),
                Some((lo, lp, hi, hp)) => {
                    let (lo, lp) = if v < lo { (v, pos) } else { (lo, lp) };
                    let (hi, hp) = if v > hi { (v, pos) } else { (hi, hp) };
                    (lo, lp, hi, hp)
                }
            });
        }
        let h = &mut self.header;
        match best {
            Some((lo, lp, hi, hp)) => {
                h.min = lo;
                h.max = hi;
                h.min_loc = [lp[0] as i32 + 1, lp[1] as i32 + 1, lp[2] as i32 + 1, 1];
                h.max_loc = [hp[0] as i32 + 1, hp[1] as i32 + 1, hp[2] as i32 + 1, 1];
            }
            None => {
                h.min = 0.0;
                h.max = 0.0;
                h.min_loc = [1; 4];
                h.max_loc = [1; 4];
            }
        }
    }

    /// Multiply every non-blank sample by `factor`.
    pub fn multiply(&mut self, factor: f32) -> Result<()> {
        let header = self.header.clone();
        self.materialize()?.mapv_inplace(|v| {
            if header.is_blank(v) || !v.is_finite() {
                v
            } else {
                v * factor
            }
        });
        self.recompute_extrema();
        Ok(())
    }

    /// Blank every sample outside `[low, high]`.
    pub fn clip(&mut self, low: f32, high: f32) -> Result<()> {
        if low > high {
            return Err(Error::InvalidValue("clip range is inverted"));
        }
        let blank = self.header.blank_value();
        self.materialize()?.mapv_inplace(|v| {
            if v.is_finite() && (v < low || v > high) {
                blank
            } else {
                v
            }
        });
        self.recompute_extrema();
        Ok(())
    }

    /// Copy reduced so that no axis exceeds `max = [nx, ny, nz]`.
    ///
    /// Each output cell averages the non-blank samples it covers; a cell with
    /// none gets the blanking value. File-backed cubes are streamed one plane
    /// at a time and give the same result as materialized ones.
    pub fn rebinned(&self, max: [usize; 3]) -> Result<CubeRecord> {
        if max.contains(&0) {
            return Err(Error::InvalidValue("rebin target must be at least one pixel"));
        }
        let h = &self.header;
        let dims = [h.nx(), h.ny(), h.nz()];
        let factors = [0, 1, 2].map(|a| dims[a].div_ceil(max[a]).max(1));
        let out_dims = [0, 1, 2].map(|a| dims[a].div_ceil(factors[a]));

        let volume = match &self.data {
            CubeData::Materialized(v) => rebin_planes(h, factors, out_dims, |k| {
                Ok(v.index_axis(Axis(0), k).to_owned())
            })?,
            CubeData::FileBacked(path) => {
                let mut reader = PlaneReader::open(path, h)?;
                rebin_planes(h, factors, out_dims, |k| reader.read_plane(k, h.ny(), h.nx()))?
            }
        };

        let mut header = h.clone();
        for a in 0..3 {
            let f = factors[a] as f64;
            let ax = h.axes[a];
            header.axes[a] = AxisFormula::new(
                (ax.reference + (f - 1.0) / 2.0) / f,
                ax.value,
                ax.increment * f,
            );
        }
        header.vel_resol *= factors[2] as f32;
        header.freq_resol *= factors[2] as f64;
        header.set_dims(out_dims[0], out_dims[1], out_dims[2]);
        log::debug!("rebinned cube by factors {factors:?} to {out_dims:?}");
        CubeRecord::new(header, volume)
    }

    /// In-place form of [`CubeRecord::rebinned`].
    pub fn rebin(&mut self, max: [usize; 3]) -> Result<()> {
        *self = self.rebinned(max)?;
        Ok(())
    }

    /// Resample every plane onto an `nx`×`ny` grid with a separable natural
    /// cubic spline, keeping the spatial extent.
    ///
    /// Output pixels whose nearest source pixel is blank are blanked.
    pub fn resample_spatial(&mut self, nx: usize, ny: usize) -> Result<()> {
        if nx == 0 || ny == 0 {
            return Err(Error::InvalidValue("resampled grid must be non-empty"));
        }
        let header = self.header.clone();
        let (snx, sny) = (header.nx(), header.ny());
        if snx == 0 || sny == 0 {
            return Err(Error::InvalidValue("cannot resample an empty plane"));
        }
        let blank = header.blank_value();
        let volume = self.materialize()?;
        let nz = volume.dim().0;
        let mut out = Array3::<f32>::zeros((nz, ny, nx));
        for k in 0..nz {
            let plane = volume.index_axis(Axis(0), k);
            let filled = plane.mapv(|v| if header.is_blank(v) { 0.0 } else { v as f64 });
            // Rows first, then columns.
            let mut rows = Array2::<f64>::zeros((sny, nx));
            for j in 0..sny {
                let row = resample_uniform(&filled.row(j).to_vec(), nx)?;
                rows.row_mut(j).assign(&ndarray::Array1::from(row));
            }
            for i in 0..nx {
                let col = resample_uniform(&rows.column(i).to_vec(), ny)?;
                for (j, v) in col.into_iter().enumerate() {
                    out[[k, j, i]] = v as f32;
                }
            }
            for j in 0..ny {
                let Some(sj) = nearest_source(j, ny, sny) else { break };
                for i in 0..nx {
                    let Some(si) = nearest_source(i, nx, snx) else { break };
                    if header.is_blank(plane[[sj, si]]) {
                        out[[k, j, i]] = blank;
                    }
                }
            }
        }
        let mut header = header;
        for (a, (n_old, n_new)) in [(snx, nx), (sny, ny)].into_iter().enumerate() {
            let ax = header.axes[a];
            let ratio = n_new as f64 / n_old as f64;
            header.axes[a] = AxisFormula::new(
                0.5 + (ax.reference - 0.5) * ratio,
                ax.value,
                ax.increment / ratio,
            );
        }
        header.set_dims(nx, ny, nz);
        *self = CubeRecord::new(header, out)?;
        Ok(())
    }

    /// Convolve every plane with `kernel`.
    pub fn convolve(&mut self, kernel: &Kernel, opts: &ConvolutionOptions) -> Result<()> {
        let header = self.header.clone();
        let volume = self.materialize()?;
        let out = kernel.convolve_all(volume, &header, opts);
        *volume = out;
        self.recompute_extrema();
        Ok(())
    }

    /// Convolved spectrum at pixel `(i, j)`, leaving the cube untouched.
    pub fn convolve_at(
        &self,
        kernel: &Kernel,
        i: usize,
        j: usize,
        opts: &ConvolutionOptions,
    ) -> Result<Vec<f32>> {
        self.check_pixel(i, j)?;
        let volume = self.to_volume()?;
        kernel.convolve_at(&volume, &self.header, i, j, opts)
    }

    /// Integrated intensity over planes `first..=last` (0-based).
    ///
    /// Each channel contributes `value * |velocity increment|`. With `clip`,
    /// only samples at or above the threshold are summed. Pixels with no
    /// contributing sample are blanked. The result is a single-plane cube.
    pub fn moment0(&self, first: usize, last: usize, clip: Option<f32>) -> Result<CubeRecord> {
        let nz = self.header.nz();
        if first >= nz {
            return Err(Error::ChannelRange { index: first, len: nz });
        }
        if last >= nz || last < first {
            return Err(Error::ChannelRange { index: last, len: nz });
        }
        let (nx, ny) = (self.header.nx(), self.header.ny());
        let dv = self.header.axes[2].increment.abs();
        let mut sum = Array2::<f64>::zeros((ny, nx));
        let mut count = Array2::<u32>::zeros((ny, nx));
        let mut anomalies = AnomalyLog::default();
        for k in first..=last {
            let plane = self.plane(k)?;
            for ((j, i), &v) in plane.indexed_iter() {
                if !v.is_finite() {
                    anomalies.report("moment-0", i, j, k);
                    continue;
                }
                if self.header.is_blank(v) || clip.is_some_and(|c| v < c) {
                    continue;
                }
                sum[[j, i]] += v as f64 * dv;
                count[[j, i]] += 1;
            }
        }
        let blank = self.header.blank_value();
        let map = ndarray::Zip::from(&sum)
            .and(&count)
            .map_collect(|&s, &n| if n == 0 { blank } else { s as f32 });

        let mut header = self.header.clone();
        let mid = (first + last) as f64 / 2.0 + 1.0;
        header.axes[2] = AxisFormula::new(1.0, self.header.axes[2].world(mid), dv * (last - first + 1) as f64);
        header.unit = format!("{}.km/s", self.header.unit);
        header.set_dims(nx, ny, 1);
        CubeRecord::new(header, map.insert_axis(Axis(0)))
    }

    /// Spectra sampled along a polyline of world offsets `(x, y)`.
    ///
    /// Samples are spaced by one pixel (|x increment|) along each segment and
    /// spectra are interpolated bilinearly; samples off the map are blank.
    pub fn strip(&self, path: &[(f64, f64)]) -> Result<PvStrip> {
        if path.len() < 2 {
            return Err(Error::InvalidValue("a strip needs at least two vertices"));
        }
        let step = self.header.axes[0].increment.abs();
        if step == 0.0 {
            return Err(Error::InvalidValue("pixel increment must be non-zero"));
        }
        let mut positions = Vec::new();
        let mut offsets = Vec::new();
        let mut travelled = 0.0;
        for (seg, w) in path.windows(2).enumerate() {
            let ((x0, y0), (x1, y1)) = (w[0], w[1]);
            let len = (x1 - x0).hypot(y1 - y0);
            let n = (len / step + 1e-9).floor() as usize;
            // Later segments start one step in, to not repeat the shared vertex.
            let start = usize::from(seg > 0);
            for s in start..=n {
                let t = if len > 0.0 { s as f64 * step / len } else { 0.0 };
                positions.push((x0 + t * (x1 - x0), y0 + t * (y1 - y0)));
                offsets.push(travelled + s as f64 * step);
            }
            travelled += len;
        }

        let volume = self.to_volume()?;
        let nz = self.header.nz();
        let blank = self.header.blank_value();
        let mut data = Array2::<f32>::from_elem((positions.len(), nz), blank);
        for (n, &(x, y)) in positions.iter().enumerate() {
            let (px, py, _) = self.pixel_of(x, y, 0.0);
            for k in 0..nz {
                if let Some(v) = bilinear(volume.index_axis(Axis(0), k), &self.header, px, py) {
                    data[[n, k]] = v;
                }
            }
        }
        Ok(PvStrip {
            offsets,
            positions,
            data,
        })
    }

    /// Encode the cube, header first, in the header's encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Write the cube to `path`.
    ///
    /// A file-backed cube is streamed plane by plane and cannot be written
    /// over its own backing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.backing_path().is_some_and(|p| p == path) {
            return Err(Error::InvalidValue("cannot overwrite the backing file of a file-backed cube"));
        }
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        log::info!("wrote cube to {}", path.display());
        Ok(())
    }

    fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut header = self.header.clone();
        header.set_dims(header.nx(), header.ny(), header.nz());
        out.write_all(&header.to_bytes()?)?;
        let codec = Codec::for_encoding(header.encoding);
        let mut raw = vec![0u8; header.plane_len() * 4];
        for k in 0..header.nz() {
            let plane = self.plane(k)?;
            let values: Vec<f32> = plane.iter().copied().collect();
            codec.write_f32_array(&mut raw, 0, &values)?;
            out.write_all(&raw)?;
        }
        Ok(())
    }
}

/// Average planes into cells of `factors` pixels, pulling source planes in
/// order from `next_plane`.
fn rebin_planes<F>(
    header: &CubeHeader,
    factors: [usize; 3],
    out_dims: [usize; 3],
    mut next_plane: F,
) -> Result<Array3<f32>>
where
    F: FnMut(usize) -> Result<Array2<f32>>,
{
    let [fx, fy, fz] = factors;
    let [onx, ony, onz] = out_dims;
    let blank = header.blank_value();
    let mut out = Array3::<f32>::from_elem((onz, ony, onx), blank);
    let mut sum = Array2::<f64>::zeros((ony, onx));
    let mut count = Array2::<u32>::zeros((ony, onx));
    for kk in 0..onz {
        sum.fill(0.0);
        count.fill(0);
        for k in kk * fz..((kk + 1) * fz).min(header.nz()) {
            let plane = next_plane(k)?;
            for ((j, i), &v) in plane.indexed_iter() {
                if header.is_blank(v) || !v.is_finite() {
                    continue;
                }
                sum[[j / fy, i / fx]] += v as f64;
                count[[j / fy, i / fx]] += 1;
            }
        }
        for ((j, i), &n) in count.indexed_iter() {
            if n > 0 {
                out[[kk, j, i]] = (sum[[j, i]] / n as f64) as f32;
            }
        }
    }
    Ok(out)
}

/// 0-based source index nearest to the center of output pixel `p`.
fn nearest_source(p: usize, n_out: usize, n_in: usize) -> Option<usize> {
    let last = n_in.checked_sub(1)?;
    let x = (p as f64 + 0.5) * n_in as f64 / n_out as f64;
    Some((x.floor() as usize).min(last))
}

/// Bilinear interpolation at fractional 0-based position `(x, y)`.
///
/// Blank corners are left out and the remaining weights renormalized.
/// Returns `None` off the map or when every corner is blank.
pub(crate) fn bilinear(plane: ArrayView2<f32>, header: &CubeHeader, x: f64, y: f64) -> Option<f32> {
    let (ny, nx) = plane.dim();
    if !(x > -0.5 && y > -0.5 && x < nx as f64 - 0.5 && y < ny as f64 - 0.5) {
        return None;
    }
    let x = x.clamp(0.0, (nx - 1) as f64);
    let y = y.clamp(0.0, (ny - 1) as f64);
    let (i0, j0) = (x.floor() as usize, y.floor() as usize);
    let (i1, j1) = ((i0 + 1).min(nx - 1), (j0 + 1).min(ny - 1));
    let (tx, ty) = (x - i0 as f64, y - j0 as f64);
    let corners = [
        (i0, j0, (1.0 - tx) * (1.0 - ty)),
        (i1, j0, tx * (1.0 - ty)),
        (i0, j1, (1.0 - tx) * ty),
        (i1, j1, tx * ty),
    ];
    let mut acc = 0.0;
    let mut wsum = 0.0;
    for (i, j, w) in corners {
        let v = plane[[j, i]];
        if w == 0.0 || !v.is_finite() || header.is_blank(v) {
            continue;
        }
        acc += v as f64 * w;
        wsum += w;
    }
    (wsum > 0.0).then(|| (acc / wsum) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn ramp(nx: usize, ny: usize, nz: usize) -> Array3<f32> {
        Array3::from_shape_fn((nz, ny, nx), |(k, j, i)| (100 * k + 10 * j + i) as f32)
    }

    fn cube(nx: usize, ny: usize, nz: usize) -> CubeRecord {
        let mut c = CubeRecord::from_volume(Encoding::Ieee, ramp(nx, ny, nz)).unwrap();
        let h = c.header_mut();
        h.axes[0] = AxisFormula::new(1.0, 0.0, -1.0e-5);
        h.axes[1] = AxisFormula::new(1.0, 0.0, 1.0e-5);
        h.axes[2] = AxisFormula::new(1.0, -5.0, 0.5);
        h.blank = -1000.0;
        h.blank_tolerance = 0.0;
        c
    }

    #[test]
    fn shape_mismatch_rejected() {
        let h = CubeHeader::new(Encoding::Ieee, 4, 4, 2);
        assert!(CubeRecord::new(h, Array3::zeros((2, 4, 5))).is_err());
    }

    #[test]
    fn extrema_are_one_based() {
        let c = cube(4, 3, 2);
        assert_eq!(c.header().min, 0.0);
        assert_eq!(c.header().max, 123.0);
        assert_eq!(c.header().min_loc, [1, 1, 1, 1]);
        assert_eq!(c.header().max_loc, [4, 3, 2, 1]);
    }

    #[test]
    fn bytes_roundtrip_both_encodings() {
        for enc in [Encoding::Ieee, Encoding::Eeei] {
            let mut c = cube(5, 4, 3);
            c.header_mut().encoding = enc;
            let bytes = c.to_bytes().unwrap();
            assert_eq!(bytes.len(), CUBE_HEADER_SIZE + 5 * 4 * 3 * 4);
            let back = CubeRecord::from_bytes(&bytes).unwrap();
            assert_eq!(back.volume(), c.volume());
            assert_eq!(back.header(), c.header());
        }
    }

    #[test]
    fn file_backed_reads_match_memory() {
        let c = cube(6, 5, 4);
        let file = NamedTempFile::new().unwrap();
        c.write(file.path()).unwrap();

        let disk = CubeRecord::open(file.path()).unwrap();
        assert!(!disk.is_materialized());
        assert_eq!(disk.plane(2).unwrap(), c.plane(2).unwrap());
        assert_eq!(disk.spectrum_at(3, 1).unwrap(), vec![13.0, 113.0, 213.0, 313.0]);
        assert!(matches!(disk.plane(4), Err(Error::ChannelRange { index: 4, len: 4 })));
    }

    #[test]
    fn truncated_file_is_corrupt_offset() {
        let c = cube(6, 5, 4);
        let mut bytes = c.to_bytes().unwrap();
        bytes.truncate(bytes.len() - 8);
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &bytes).unwrap();
        assert!(matches!(
            CubeRecord::open(file.path()),
            Err(Error::CorruptOffset { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_corrupt_offset() {
        let mut h = CubeHeader::new(Encoding::Ieee, 1, 1, 1);
        h.dims = [i32::MAX, i32::MAX, i32::MAX, 1];
        let mut bytes = h.to_bytes().unwrap().to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            CubeRecord::from_bytes(&bytes),
            Err(Error::CorruptOffset { .. })
        ));
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &bytes).unwrap();
        assert!(matches!(
            CubeRecord::open(file.path()),
            Err(Error::CorruptOffset { .. })
        ));
    }

    #[test]
    fn empty_plane_not_resampled() {
        let mut c = CubeRecord::from_volume(Encoding::Ieee, Array3::zeros((2, 0, 3))).unwrap();
        assert!(matches!(c.resample_spatial(4, 4), Err(Error::InvalidValue(_))));
        assert_eq!(nearest_source(0, 4, 0), None);
        assert_eq!(nearest_source(3, 4, 2), Some(1));
    }

    #[test]
    fn mutation_materializes() {
        let c = cube(3, 3, 2);
        let file = NamedTempFile::new().unwrap();
        c.write(file.path()).unwrap();
        let mut disk = CubeRecord::open(file.path()).unwrap();
        disk.multiply(2.0).unwrap();
        assert!(disk.is_materialized());
        assert_eq!(disk.backing_path(), None);
        assert_eq!(disk.header().max, 2.0 * 122.0);

        disk.reset_backing_path(file.path()).unwrap();
        assert!(!disk.is_materialized());
        assert_eq!(disk.header().max, 122.0);
    }

    #[test]
    fn rebin_to_own_size_is_identity() {
        let c = cube(7, 5, 3);
        let r = c.rebinned([7, 5, 3]).unwrap();
        assert_eq!(r.volume(), c.volume());
        assert_eq!(r.header().axes, c.header().axes);
    }

    #[test]
    fn rebin_averages_and_updates_formula() {
        let c = cube(4, 4, 2);
        let r = c.rebinned([2, 2, 1]).unwrap();
        let v = r.volume().unwrap();
        assert_eq!(v.dim(), (1, 2, 2));
        // Cell (0,0) averages i,j in {0,1} over both planes.
        assert_eq!(v[[0, 0, 0]], 55.5);
        let ax = r.header().axes[0];
        assert_eq!(ax.reference, 0.75);
        assert_eq!(ax.increment, -2.0e-5);
        // World coordinate of a rebinned pixel is the mean of the old ones.
        let old = (c.world_at(0, 0, 0).0 + c.world_at(1, 0, 0).0) / 2.0;
        assert!((r.world_at(0, 0, 0).0 - old).abs() < 1e-15);
    }

    #[test]
    fn rebin_skips_blanks_and_blanks_empty_cells() {
        let mut c = cube(2, 2, 1);
        {
            let v = c.materialize().unwrap();
            v[[0, 0, 0]] = -1000.0;
            v[[0, 0, 1]] = 4.0;
            v[[0, 1, 0]] = -1000.0;
            v[[0, 1, 1]] = 6.0;
        }
        let r = c.rebinned([1, 1, 1]).unwrap();
        assert_eq!(r.volume().unwrap()[[0, 0, 0]], 5.0);

        c.materialize().unwrap().fill(-1000.0);
        let r = c.rebinned([1, 1, 1]).unwrap();
        assert_eq!(r.volume().unwrap()[[0, 0, 0]], -1000.0);
    }

    #[test]
    fn streamed_rebin_matches_in_memory() {
        let c = cube(9, 7, 5);
        let file = NamedTempFile::new().unwrap();
        c.write(file.path()).unwrap();
        let disk = CubeRecord::open(file.path()).unwrap();
        let a = c.rebinned([4, 3, 2]).unwrap();
        let b = disk.rebinned([4, 3, 2]).unwrap();
        assert_eq!(a.volume(), b.volume());
        assert_eq!(a.header(), b.header());
    }

    #[test]
    fn spline_resample_preserves_extent() {
        let mut c = cube(8, 6, 1);
        let before = c.world_at(0, 0, 0).0 - 0.5 * c.header().axes[0].increment;
        c.resample_spatial(4, 3).unwrap();
        assert_eq!(c.volume().unwrap().dim(), (1, 3, 4));
        let after = c.world_at(0, 0, 0).0 - 0.5 * c.header().axes[0].increment;
        assert!((before - after).abs() < 1e-15);
        // A plane linear in i and j is reproduced by the spline in the interior.
        let v = c.volume().unwrap();
        assert!((v[[0, 1, 1]] - (10.0 * 2.5 + 2.5)).abs() < 1e-3);
    }

    #[test]
    fn uniform_cube_convolution() {
        let mut c = CubeRecord::from_volume(Encoding::Ieee, Array3::from_elem((2, 8, 8), 3.0)).unwrap();
        let beam = crate::cube_header::Beam {
            major: 2.0,
            minor: 1.5,
            position_angle: 0.2,
        };
        let k = Kernel::from_beam(&beam, 1.0, 1.0, 3.0).unwrap();
        c.convolve(&k, &ConvolutionOptions::default()).unwrap();
        assert!(c.volume().unwrap().iter().all(|v| (v - 3.0).abs() < 1e-5));
        let spec = c.convolve_at(&k, 0, 0, &ConvolutionOptions::default()).unwrap();
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn moment0_sums_channels() {
        let c = cube(3, 2, 4);
        let m = c.moment0(1, 2, None).unwrap();
        let map = m.volume().unwrap();
        assert_eq!(map.dim(), (1, 2, 3));
        // (100 + 200) * 0.5 at pixel (0,0).
        assert_eq!(map[[0, 0, 0]], 150.0);
        let clipped = c.moment0(1, 2, Some(150.0)).unwrap();
        assert_eq!(clipped.volume().unwrap()[[0, 0, 0]], 100.0);
        let none = c.moment0(0, 0, Some(1.0e6)).unwrap();
        assert_eq!(none.volume().unwrap()[[0, 0, 0]], -1000.0);
    }

    #[test]
    fn moment0_range_checked() {
        let c = cube(3, 2, 4);
        assert!(matches!(c.moment0(2, 1, None), Err(Error::ChannelRange { .. })));
        assert!(matches!(c.moment0(0, 4, None), Err(Error::ChannelRange { .. })));
        assert!(matches!(c.moment0(4, 4, None), Err(Error::ChannelRange { .. })));
    }

    #[test]
    fn strip_along_a_row() {
        let c = cube(6, 4, 2);
        let (x0, y1, _) = c.world_at(0, 1, 0);
        let (x5, _, _) = c.world_at(5, 1, 0);
        let strip = c.strip(&[(x0, y1), (x5, y1)]).unwrap();
        assert_eq!(strip.data.dim(), (6, 2));
        for n in 0..6 {
            assert!((strip.data[[n, 0]] - (10.0 + n as f32)).abs() < 1e-3);
            assert!((strip.data[[n, 1]] - (110.0 + n as f32)).abs() < 1e-3);
        }
        assert!((strip.offsets[5] - 5.0e-5).abs() < 1e-15);
    }

    #[test]
    fn strip_off_map_is_blank() {
        let c = cube(3, 3, 1);
        let strip = c.strip(&[(1.0, 1.0), (1.0 + 1.0e-5, 1.0)]).unwrap();
        assert!(strip.data.iter().all(|&v| v == -1000.0));
    }

    #[test]
    fn clip_blanks_outliers() {
        let mut c = cube(3, 3, 1);
        c.clip(5.0, 20.0).unwrap();
        let v = c.volume().unwrap();
        assert_eq!(v[[0, 0, 0]], -1000.0);
        assert_eq!(v[[0, 1, 0]], 10.0);
        assert_eq!(c.header().min, 10.0);
        assert!(c.clip(3.0, 1.0).is_err());
    }

    #[test]
    fn velocity_axis_follows_formula() {
        let c = cube(2, 2, 3);
        assert_eq!(c.velocity_axis(), vec![-5.0, -4.5, -4.0]);
        let (_, _, v) = c.world_at(0, 0, 2);
        assert_eq!(c.pixel_of(0.0, 0.0, v).2, 2.0);
    }

    #[test]
    fn cannot_overwrite_backing_file() {
        let c = cube(2, 2, 1);
        let file = NamedTempFile::new().unwrap();
        c.write(file.path()).unwrap();
        let disk = CubeRecord::open(file.path()).unwrap();
        assert!(disk.write(file.path()).is_err());
    }
}
