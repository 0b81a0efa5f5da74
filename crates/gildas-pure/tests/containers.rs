//! Integration tests for CLASS containers written to and read from disk.

use gildas_pure::codec::{Encoding, GildasDate};
use gildas_pure::container::SpectrumContainer;
use gildas_pure::entry::{DataKind, SpectrumHeader};
use gildas_pure::parameter::keys;
use gildas_pure::spectrum::{GenericSpectrum, SpectralAxis, SpectrumRecord};
use gildas_pure::writer::ContainerWriter;
use gildas_pure::Error;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record(obs: i32, kind: DataKind, nchan: usize) -> SpectrumRecord {
    let header = SpectrumHeader {
        observation: obs,
        source: "ORION-KL".into(),
        line: "CO(1-0)".into(),
        telescope: "IRAM30M".into(),
        observed: GildasDate::from_ymd(2019, 11, 2).unwrap(),
        scan: obs * 3,
        kind,
        ..SpectrumHeader::default()
    };
    let axis = SpectralAxis::new(32.0, 8.5, -0.25, 115271.2018).unwrap();
    let data = (0..nchan).map(|i| obs as f32 + i as f32 * 0.125).collect();
    let mut rec = SpectrumRecord::from_axis(header, axis, data);
    rec.params_mut().set_f64(keys::TSYS, 180.5);
    rec.params_mut().set_f64(keys::INTEGRATION_TIME, 60.0);
    rec
}

fn write_temp(records: &[SpectrumRecord], encoding: Encoding) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    ContainerWriter::write(file.path(), records, encoding).unwrap();
    file
}

// ===========================================================================
// Listing and random access
// ===========================================================================

#[test]
fn listing_keeps_file_order() {
    let records = [
        record(10, DataKind::Spectrum, 64),
        record(7, DataKind::Spectrum, 64),
        record(22, DataKind::Spectrum, 64),
    ];
    let file = write_temp(&records, Encoding::Ieee);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    assert_eq!(c.list_spectra(false).unwrap(), vec![10, 7, 22]);
    for r in &records {
        let obs = r.observation_number();
        let got = c.get_by_observation(obs).unwrap().unwrap();
        assert_eq!(got.data(), r.data());
        assert_eq!(got.header().source, "ORION-KL");
        assert_eq!(got.header().scan, obs * 3);
    }
}

#[test]
fn observation_numbers_unique_across_logical_indices() {
    let records: Vec<_> = [5, 3, 9, 1, 4].iter().map(|&o| record(o, DataKind::Spectrum, 8)).collect();
    let file = write_temp(&records, Encoding::Eeei);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    let n = c.spectrum_count().unwrap();
    let mut seen: Vec<i32> = (0..n)
        .map(|i| c.get_spectrum(i).unwrap().observation_number())
        .collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), n);
}

#[test]
fn both_encodings_read_back_identically() {
    let records = [record(1, DataKind::Spectrum, 100), record(2, DataKind::Spectrum, 100)];
    for enc in [Encoding::Ieee, Encoding::Eeei] {
        let file = write_temp(&records, enc);
        let mut c = SpectrumContainer::open(file.path()).unwrap();
        assert_eq!(c.encoding().unwrap(), enc);
        let got = c.get_spectrum(1).unwrap();
        assert_eq!(got.data(), records[1].data());
        let axis = got.axis().unwrap();
        assert_eq!(axis.ref_chan, 32.0);
        assert_eq!(axis.vel_resol, -0.25);
        assert_eq!(axis.ref_freq, 115271.2018);
        assert_eq!(got.params().get_f64(keys::TSYS), Some(180.5));
        assert_eq!(got.observation_date(), records[1].observation_date());
    }
}

#[test]
fn continuum_filtered_from_spectral_listing() {
    let records = [
        record(1, DataKind::Spectrum, 16),
        record(2, DataKind::Continuum, 16),
        record(3, DataKind::Spectrum, 16),
    ];
    let file = write_temp(&records, Encoding::Ieee);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    assert_eq!(c.list_spectra(true).unwrap(), vec![1, 3]);
    assert_eq!(c.list_spectra(false).unwrap(), vec![1, 2, 3]);
}

#[test]
fn missing_observation_is_none() {
    let file = write_temp(&[record(4, DataKind::Spectrum, 16)], Encoding::Ieee);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    assert!(c.find_by_observation(99).unwrap().is_none());
    assert!(matches!(c.get_spectrum(5), Err(Error::ChannelRange { .. })));
}

// ===========================================================================
// Damaged files
// ===========================================================================

#[test]
fn truncated_file_recovers_leading_spectra() {
    let records: Vec<_> = (1..=4).map(|o| record(o, DataKind::Spectrum, 512)).collect();
    let bytes = ContainerWriter::to_bytes(&records, Encoding::Ieee).unwrap();
    let file = tempfile::NamedTempFile::new().unwrap();
    // Cut into the last observation.
    std::fs::write(file.path(), &bytes[..bytes.len() - 1024]).unwrap();

    let mut c = SpectrumContainer::open(file.path()).unwrap();
    let last = c.find_by_observation(4).unwrap().unwrap();
    assert!(matches!(c.get_spectrum(last), Err(Error::CorruptOffset { .. })));

    let mut c = SpectrumContainer::open_recovering(file.path(), 3).unwrap();
    assert_eq!(c.spectrum_count().unwrap(), 3);
    for i in 0..3 {
        assert_eq!(c.get_spectrum(i).unwrap().nchan(), 512);
    }
}

#[test]
fn closed_container_refuses_reads() {
    let file = write_temp(&[record(1, DataKind::Spectrum, 16)], Encoding::Ieee);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    c.close();
    assert!(c.is_closed());
    assert!(matches!(c.get_spectrum(0), Err(Error::Closed)));
    assert!(matches!(c.list_spectra(false), Err(Error::Closed)));
}

#[test]
fn not_a_container() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), vec![0x55u8; 2048]).unwrap();
    assert!(matches!(SpectrumContainer::open(file.path()), Err(Error::Format(_))));
}

// ===========================================================================
// Generic spectra
// ===========================================================================

#[test]
fn generic_spectrum_survives_container() {
    let generic = record(12, DataKind::Spectrum, 32).to_generic().unwrap();
    let json = serde_json::to_string(&generic).unwrap();
    let parsed: GenericSpectrum = serde_json::from_str(&json).unwrap();
    let rec = SpectrumRecord::from_generic(&parsed).unwrap();

    let file = write_temp(&[rec], Encoding::Eeei);
    let mut c = SpectrumContainer::open(file.path()).unwrap();
    let back = c.get_spectrum(0).unwrap().to_generic().unwrap();
    assert_eq!(back.observation_number, 12);
    assert_eq!(back.intensities, generic.intensities);
    assert_eq!(back.label(), generic.label());
}
