//! Text formats understood by the simulated board.
//!
//! Real board families ship binary images whose layout is vendor specific.
//! The simulator uses small line-oriented text files instead; `*` starts a
//! comment line in all three formats.
//!
//! DSP image:
//!
//! ```text
//! program 0x0c00 0x1234 0x5678
//! symbol RUNERROR r
//! symbol SLOWLEN rw 1 28
//! ```
//!
//! Symbols are numbered in file order; access is `r`, `w` or `rw`; bounds
//! default to the full 16-bit range.
//!
//! FiPPI image: whitespace separated hex words.
//!
//! Parameter defaults: one `NAME value` pair per line.

use dxp_core::{
    codes, DriverError, DriverErrorKind, DriverResult, DspImage, FippiImage, ParamAccess,
    ParamDefaults, ParamSymbol, MAX_SYMBOLS,
};
use std::path::Path;

fn read(driver: &str, path: &Path) -> DriverResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        DriverError::new(
            driver,
            DriverErrorKind::FirmwareFormat,
            format!("unable to read {}: {}", path.display(), e),
        )
        .with_code(codes::OPEN_FILE)
    })
}

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('*'))
}

fn parse_word(token: &str) -> Option<u16> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u16::from_str_radix(digits, 16).ok()
}

fn format_error(driver: &str, filename: &str, line: usize, message: &str) -> DriverError {
    DriverError::new(
        driver,
        DriverErrorKind::FirmwareFormat,
        format!("{}:{}: {}", filename, line, message),
    )
}

/// Read and decode a DSP program file.
pub fn load_dsp(driver: &str, filename: &str, path: &Path) -> DriverResult<DspImage> {
    parse_dsp(driver, filename, &read(driver, path)?)
}

/// Decode DSP program text.
pub fn parse_dsp(driver: &str, filename: &str, text: &str) -> DriverResult<DspImage> {
    let mut program = Vec::new();
    let mut symbols: Vec<ParamSymbol> = Vec::new();

    for (line_no, line) in content_lines(text) {
        let mut tokens = line.split_whitespace();
        match tokens.next().map(str::to_ascii_lowercase).as_deref() {
            Some("program") => {
                for token in tokens {
                    let word = parse_word(token).ok_or_else(|| {
                        format_error(driver, filename, line_no, &format!("bad word '{}'", token))
                    })?;
                    program.push(word);
                }
            }
            Some("symbol") => {
                let name = tokens
                    .next()
                    .ok_or_else(|| format_error(driver, filename, line_no, "symbol without name"))?;
                let access = match tokens.next().map(str::to_ascii_lowercase).as_deref() {
                    None | Some("rw") => ParamAccess::READ | ParamAccess::WRITE,
                    Some("r") => ParamAccess::READ,
                    Some("w") => ParamAccess::WRITE,
                    Some(other) => {
                        return Err(format_error(
                            driver,
                            filename,
                            line_no,
                            &format!("bad access '{}'", other),
                        ))
                    }
                };
                let bound = |token: Option<&str>, default: u16| -> DriverResult<u16> {
                    match token {
                        None => Ok(default),
                        Some(t) => t.parse().map_err(|_| {
                            format_error(driver, filename, line_no, &format!("bad bound '{}'", t))
                        }),
                    }
                };
                let lower = bound(tokens.next(), 0)?;
                let upper = bound(tokens.next(), u16::MAX)?;
                if symbols.len() >= MAX_SYMBOLS {
                    return Err(format_error(
                        driver,
                        filename,
                        line_no,
                        &format!("more than {} symbols", MAX_SYMBOLS),
                    ));
                }
                symbols.push(ParamSymbol {
                    name: name.to_string(),
                    address: symbols.len() as u16,
                    access,
                    lower,
                    upper,
                });
            }
            Some(other) => {
                return Err(format_error(
                    driver,
                    filename,
                    line_no,
                    &format!("unexpected '{}'", other),
                ))
            }
            None => {}
        }
    }

    if program.is_empty() {
        return Err(format_error(driver, filename, 0, "no program words"));
    }
    Ok(DspImage::new(filename, program, symbols))
}

/// Read and decode an FPGA image file.
pub fn load_fippi(driver: &str, filename: &str, path: &Path) -> DriverResult<FippiImage> {
    parse_fippi(driver, filename, &read(driver, path)?)
}

/// Decode FPGA image text: whitespace-separated words.
pub fn parse_fippi(driver: &str, filename: &str, text: &str) -> DriverResult<FippiImage> {
    let mut data = Vec::new();
    for (line_no, line) in content_lines(text) {
        for token in line.split_whitespace() {
            let word = parse_word(token).ok_or_else(|| {
                format_error(driver, filename, line_no, &format!("bad word '{}'", token))
            })?;
            data.push(word);
        }
    }
    if data.is_empty() {
        return Err(DriverError::new(
            driver,
            DriverErrorKind::FirmwareFormat,
            format!("{}: empty FiPPI image", filename),
        )
        .with_code(codes::FIPDOWNLOAD));
    }
    Ok(FippiImage::new(filename, data))
}

/// Read and decode a parameter defaults file.
pub fn load_defaults(driver: &str, filename: &str, path: &Path) -> DriverResult<ParamDefaults> {
    parse_defaults(driver, filename, &read(driver, path)?)
}

/// Decode `NAME = value` lines.
pub fn parse_defaults(driver: &str, filename: &str, text: &str) -> DriverResult<ParamDefaults> {
    let mut entries = Vec::new();
    for (line_no, line) in content_lines(text) {
        let mut tokens = line.split(|c: char| c.is_whitespace() || c == '=').filter(|t| !t.is_empty());
        let (Some(name), Some(value)) = (tokens.next(), tokens.next()) else {
            return Err(format_error(driver, filename, line_no, "expected 'NAME value'"));
        };
        let value: u16 = value.parse().map_err(|_| {
            format_error(driver, filename, line_no, &format!("bad value '{}'", value))
        })?;
        entries.push((name.to_string(), value));
    }
    Ok(ParamDefaults::new(filename, entries))
}
