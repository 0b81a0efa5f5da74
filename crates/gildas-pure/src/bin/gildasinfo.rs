use gildas_pure::container::SpectrumContainer;
use gildas_pure::cube::CubeRecord;
use gildas_pure::entry::DataKind;
use gildas_pure::interchange::{cube_fields, FieldValue};
use std::io::Read;
use std::process;

fn kind_label(kind: DataKind) -> String {
    match kind {
        DataKind::Spectrum => "spectrum".to_string(),
        DataKind::Continuum => "continuum".to_string(),
        DataKind::Other(code) => format!("kind {}", code),
    }
}

fn format_container(path: &str, verbose: bool) -> Result<String, String> {
    let mut container =
        SpectrumContainer::open(path).map_err(|e| format!("Error opening '{}': {}", path, e))?;
    let mut out = String::new();
    let encoding = container.encoding().map_err(|e| e.to_string())?;
    let count = container.spectrum_count().map_err(|e| e.to_string())?;
    out.push_str(&format!("CLASS container: {}\n", path));
    out.push_str(&format!("  Encoding: {:?}\n", encoding));
    out.push_str(&format!("  Observations: {}\n", count));
    for i in 0..count {
        let h = container.entry(i).map_err(|e| format!("Entry {}: {}", i, e))?;
        out.push_str(&format!(
            "  #{:<6} {:<12} {:<12} {:<12} {} scan {}\n",
            h.observation,
            h.source,
            h.line,
            h.telescope,
            kind_label(h.kind),
            h.scan
        ));
        if verbose {
            let rec = container
                .get_spectrum(i)
                .map_err(|e| format!("Spectrum {}: {}", i, e))?;
            out.push_str(&format!("          observed {}, {} channels", h.observed, rec.nchan()));
            if let Ok(axis) = rec.axis() {
                out.push_str(&format!(
                    ", {:.6} MHz, {:.4} km/s per channel",
                    axis.ref_freq, axis.vel_resol
                ));
            }
            if let Some(rms) = rec.rms() {
                out.push_str(&format!(", rms {:.4e}", rms));
            }
            out.push('\n');
        }
    }
    container.close();
    Ok(out)
}

fn format_cube(path: &str, verbose: bool) -> Result<String, String> {
    let cube = CubeRecord::open(path).map_err(|e| format!("Error opening '{}': {}", path, e))?;
    let h = cube.header();
    let mut out = String::new();
    out.push_str(&format!("GILDAS cube: {}\n", path));
    out.push_str(&format!("  Encoding: {:?}\n", h.encoding));
    out.push_str(&format!("  Dimensions: {} x {} x {}\n", h.nx(), h.ny(), h.nz()));
    out.push_str(&format!("  Source: {}  Line: {}\n", h.source, h.line));
    out.push_str(&format!("  Unit: {}\n", h.unit));
    out.push_str(&format!("  Projection: {:?}\n", h.projection));
    for (name, axis) in h.axis_names.iter().zip(&h.axes).take(3) {
        out.push_str(&format!(
            "  {:<10} ref {:>10.3} val {:>14.6e} inc {:>14.6e}\n",
            name, axis.reference, axis.value, axis.increment
        ));
    }
    out.push_str(&format!("  Rest frequency: {:.6} MHz\n", h.rest_freq));
    if h.beam.is_defined() {
        out.push_str(&format!(
            "  Beam: {:.3e} x {:.3e} rad, PA {:.3} rad\n",
            h.beam.major, h.beam.minor, h.beam.position_angle
        ));
    }
    out.push_str(&format!("  Range: {} .. {}\n", h.min, h.max));
    if verbose {
        out.push_str("  Interchange fields:\n");
        for f in cube_fields(h) {
            let value = match &f.value {
                FieldValue::Logical(b) => if *b { "T".to_string() } else { "F".to_string() },
                FieldValue::Integer(i) => i.to_string(),
                FieldValue::Real(r) => format!("{:e}", r),
                FieldValue::Text(s) => format!("'{}'", s),
            };
            if f.comment.is_empty() {
                out.push_str(&format!("    {:<8} = {}\n", f.keyword, value));
            } else {
                out.push_str(&format!("    {:<8} = {} / {}\n", f.keyword, value, f.comment));
            }
        }
    }
    Ok(out)
}

fn is_cube(path: &str) -> Result<bool, String> {
    let mut magic = [0u8; 6];
    let mut file = std::fs::File::open(path).map_err(|e| format!("Error reading '{}': {}", path, e))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"GILDAS"),
        Err(_) => Ok(false),
    }
}

fn run(args: &[String]) -> Result<String, String> {
    let mut verbose = false;
    let mut file_path = None;

    for arg in args {
        if arg == "-v" || arg == "--verbose" {
            verbose = true;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            if file_path.is_some() {
                return Err("Too many arguments".to_string());
            }
            file_path = Some(arg.as_str());
        }
    }

    let path = file_path.ok_or_else(|| {
        "Usage: gildasinfo [-v] <file>\n\nSummarize a CLASS container or a GILDAS cube.".to_string()
    })?;

    if is_cube(path)? {
        format_cube(path, verbose)
    } else {
        format_container(path, verbose)
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(output) => print!("{}", output),
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    }
}
