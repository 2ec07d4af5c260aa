use std::{io::{self, BufRead}, path::{self, PathBuf}};

use camino::Utf8PathBuf;
use normalize_path::NormalizePath;

/// Converts a user supplied path into a normalized absolute UTF-8 path
pub fn clean_path(path: PathBuf) -> anyhow::Result<Utf8PathBuf> {
    let absolute = path::absolute(&path)?.normalize();
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|p| anyhow::anyhow!("Path is not valid UTF-8: {:?}", p))
}

/// Asks a yes/no question on stdin until a recognizable answer is given
pub fn confirm(prompt: &str) -> io::Result<bool> {
    confirm_from(prompt, &mut io::stdin().lock())
}

pub fn confirm_from(prompt: &str, input: &mut impl BufRead) -> io::Result<bool> {
    loop {
        println!("{prompt}\nConfirm? (Y/N)");
        let mut confirmation = String::new();
        if input.read_line(&mut confirmation)? == 0 {
            return Ok(false);
        }

        // Trim the confirmation to remove any extra whitespace or newline characters
        match confirmation.trim() {
            "Y" | "y" | "yes" | "Yes" => return Ok(true),
            "N" | "n" | "no" | "No" => return Ok(false),
            _ => println!("Unrecognized input entered. Please try again."),
        }
    }
}
