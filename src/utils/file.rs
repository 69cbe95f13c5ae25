use std::fs::File;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    file.read_exact(&mut buffer)?;
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}


/// Builds a chromosome-scoped filename, e.g. `platypus_chr1.vcf`.
pub fn chrom_scoped_filename(prefix: &str, chrom: &str, ext: &str) -> String {
    format!("{}_{}.{}", prefix, chrom, ext)
}


/// Names the default output directory: `<patient>_YYYYMMDD`.
pub fn dated_dir_name(patient: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d");
    format!("{}_{}", patient, timestamp)
}


/// Resolves a possibly-relative CLI path against the working directory.
pub fn resolve_input_path(raw: &str, cwd: &Path) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}
