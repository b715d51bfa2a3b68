use std::fs;
use std::io;
use std::io::{Read, Write};
use std::path::Path;

/// Read a whole file. `-` reads standard input.
pub fn read_file<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<Vec<u8>> {
    let mut content = Vec::new();
    if f.as_ref() == Path::new("-") {
        io::stdin().read_to_end(&mut content)?;
    } else {
        content = fs::read(f)?;
    }
    Ok(content)
}

/// Open a file for writing. `-` writes to standard output.
pub fn write_file<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<Box<dyn Write>> {
    Ok(if f.as_ref() == Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(io::BufWriter::new(fs::File::create(f)?))
    })
}

pub fn make_sure_dir_exists<F: AsRef<Path> + ?Sized>(f: &F) -> io::Result<()> {
    let path = f.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Input paths to process: the file itself, or the files directly inside a directory.
pub fn collect_files(path: &str) -> io::Result<Vec<String>> {
    let pa = Path::new(path);
    if path == "-" || pa.is_file() {
        return Ok(vec![path.to_string()]);
    }
    if pa.is_dir() {
        let mut result = Vec::new();
        for entry in fs::read_dir(pa)? {
            let entry_path = entry?.path();
            if entry_path.is_file() {
                if let Some(path_str) = entry_path.to_str() {
                    result.push(path_str.to_string());
                }
            }
        }
        result.sort();
        return Ok(result);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("Path {} is neither a file nor a directory", pa.display()),
    ))
}
