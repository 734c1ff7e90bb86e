//! System (`XIA_CONFIG`) file parser.
//!
//! ```text
//! * board types and their auxiliary libraries
//! dxpx10p
//! dxp4c2x  dxp4c2x.lib
//! preamp   preamp.ini
//! modules  system.mod
//! ```

use super::tokenizer::config_lines;
use dxp_core::{Result, XerxesError};

/// One parsed system file line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SystemDirective {
    /// Board type declaration with optional auxiliary library name.
    BoardType { name: String, pointer: Option<String> },
    /// `preamp`: preamp file name.
    Preamp(String),
    /// `modules`: modules file name.
    Modules(String),
}

fn is_board_type(token: &str) -> bool {
    token.starts_with("dxp") || token.starts_with("dgf") || token.starts_with("udxp") || token == "polaris"
}

/// Parse a whole system file.
pub fn parse_system(text: &str) -> Result<Vec<(usize, SystemDirective)>> {
    let mut directives = Vec::new();
    for line in config_lines(text) {
        let directive = if is_board_type(&line.directive) {
            SystemDirective::BoardType {
                name: line.directive.clone(),
                pointer: line.filename().map(str::to_string),
            }
        } else {
            let file = || {
                line.filename()
                    .map(str::to_string)
                    .ok_or_else(|| XerxesError::MalformedLine {
                        line: line.number,
                        message: format!("'{}' needs a filename", line.directive),
                    })
            };
            match line.directive.as_str() {
                "preamp" => SystemDirective::Preamp(file()?),
                "modules" => SystemDirective::Modules(file()?),
                _ => {
                    return Err(XerxesError::UnrecognizedDirective {
                        line: line.number,
                        token: line.directive.clone(),
                    })
                }
            }
        };
        directives.push((line.number, directive));
    }
    Ok(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_system_file() {
        let text = "* system\nDXPX10P\ndxp4c2x dxp4c2x.lib\npreamp  preamp.ini\nmodules = my setup.mod\n";
        let directives = parse_system(text).unwrap();
        assert_eq!(
            directives,
            vec![
                (2, SystemDirective::BoardType { name: "dxpx10p".into(), pointer: None }),
                (
                    3,
                    SystemDirective::BoardType {
                        name: "dxp4c2x".into(),
                        pointer: Some("dxp4c2x.lib".into())
                    }
                ),
                (4, SystemDirective::Preamp("preamp.ini".into())),
                (5, SystemDirective::Modules("my setup.mod".into())),
            ]
        );
    }

    #[test]
    fn test_unknown_directive_is_an_error() {
        let err = parse_system("dxpx10p\nfrobnicate 1\n").unwrap_err();
        assert!(matches!(
            err,
            XerxesError::UnrecognizedDirective { line: 2, ref token } if token == "frobnicate"
        ));
        assert_eq!(err.code(), dxp_core::codes::INPUT_UNDEFINED);
    }

    #[test]
    fn test_modules_without_filename() {
        assert!(matches!(
            parse_system("modules\n"),
            Err(XerxesError::MalformedLine { line: 1, .. })
        ));
    }
}
