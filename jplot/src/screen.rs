//! The terminal jplot draws into.
//!
//! Frames are PNG images shown inline with the `iTerm2` image protocol, which
//! `WezTerm` also speaks. Terminals without that protocol are refused at
//! startup.

use std::{
    env,
    io::{self, Write},
    os::fd::{AsRawFd, RawFd},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;

use crate::render::Size;

/// Cell size assumed when the terminal reports no pixel dimensions.
const FALLBACK_CELL: (u16, u16) = (8, 16);
const SUPPORTED_PROGRAMS: [&str; 2] = ["iTerm.app", "WezTerm"];

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Screen`] implementations
pub enum Error {
    /// The terminal cannot display inline images.
    #[error(
        "terminal does not support inline images (TERM_PROGRAM={term_program:?}, TERM={term:?}), iTerm2 or WezTerm is required"
    )]
    Unsupported {
        /// Value of `TERM_PROGRAM`, if set.
        term_program: Option<String>,
        /// Value of `TERM`, if set.
        term: Option<String>,
    },
    /// The terminal size could not be queried.
    #[error("failed to query terminal size: {0}")]
    Size(nix::Error),
    /// The terminal reported no rows or columns.
    #[error("terminal reported a size of zero")]
    ZeroSize,
    /// Writing to the terminal failed.
    #[error("failed to write to terminal: {0}")]
    Io(#[from] io::Error),
}

/// Terminal dimensions as reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Text columns.
    pub cols: u16,
    /// Text rows.
    pub rows: u16,
    /// Width in pixels, zero if unknown.
    pub width: u16,
    /// Height in pixels, zero if unknown.
    pub height: u16,
}

impl Geometry {
    /// The image size that fills the terminal while leaving the bottom text
    /// row free for the cursor.
    #[must_use]
    pub fn canvas(self) -> Size {
        let cols = u32::from(self.cols.max(1));
        let rows = u32::from(self.rows.max(1));
        let (width, cell_height) = if self.width == 0 || self.height == 0 {
            (
                cols * u32::from(FALLBACK_CELL.0),
                u32::from(FALLBACK_CELL.1),
            )
        } else {
            (u32::from(self.width), u32::from(self.height) / rows)
        };
        Size {
            width,
            height: (rows - 1).max(1) * cell_height,
        }
    }
}

/// A display that frames can be drawn on.
pub trait Screen {
    /// Query the current terminal dimensions.
    ///
    /// # Errors
    ///
    /// Implementations return an error if the size cannot be determined.
    fn size(&mut self) -> Result<Geometry, Error>;

    /// Prepare the terminal before the first frame.
    ///
    /// # Errors
    ///
    /// Implementations return an error if the terminal cannot be written.
    fn prepare(&mut self) -> Result<(), Error>;

    /// Show one PNG frame, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Implementations return an error if the terminal cannot be written.
    fn draw(&mut self, png: &[u8]) -> Result<(), Error>;

    /// Drop the terminal's scrollback, which otherwise grows with every frame.
    ///
    /// # Errors
    ///
    /// Implementations return an error if the terminal cannot be written.
    fn clear_scrollback(&mut self) -> Result<(), Error>;
}

#[allow(unreachable_pub)]
mod sys {
    nix::ioctl_read_bad!(window_size, nix::libc::TIOCGWINSZ, nix::libc::winsize);
}

/// Query the window size of the terminal on `fd`.
///
/// # Errors
///
/// Function will return an error if `fd` is not a terminal or reports zero
/// rows or columns.
pub fn window_size(fd: RawFd) -> Result<Geometry, Error> {
    let mut ws = nix::libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` is a valid, writable winsize for the duration of the call.
    unsafe { sys::window_size(fd, &raw mut ws) }.map_err(Error::Size)?;
    if ws.ws_col == 0 || ws.ws_row == 0 {
        return Err(Error::ZeroSize);
    }
    Ok(Geometry {
        cols: ws.ws_col,
        rows: ws.ws_row,
        width: ws.ws_xpixel,
        height: ws.ws_ypixel,
    })
}

/// Check that the hosting terminal can display inline images.
///
/// # Errors
///
/// Function will return [`Error::Unsupported`] if it cannot.
pub fn check_support() -> Result<(), Error> {
    check_support_with(
        env::var("TERM_PROGRAM").ok().as_deref(),
        env::var("TERM").ok().as_deref(),
    )
}

/// As [`check_support`] with explicit `TERM_PROGRAM` and `TERM` values.
///
/// # Errors
///
/// Function will return [`Error::Unsupported`] unless `term_program` names a
/// supported terminal and `term` is not a `screen` multiplexer.
pub fn check_support_with(term_program: Option<&str>, term: Option<&str>) -> Result<(), Error> {
    let program_ok = term_program.is_some_and(|program| SUPPORTED_PROGRAMS.contains(&program));
    let multiplexed = term.is_some_and(|term| term.starts_with("screen"));
    if program_ok && !multiplexed {
        Ok(())
    } else {
        Err(Error::Unsupported {
            term_program: term_program.map(ToString::to_string),
            term: term.map(ToString::to_string),
        })
    }
}

/// An `iTerm2` compatible terminal.
#[derive(Debug)]
pub struct ITerm<W> {
    out: W,
    fd: RawFd,
}

impl ITerm<io::Stdout> {
    /// The terminal on standard output.
    #[must_use]
    pub fn stdout() -> Self {
        let out = io::stdout();
        let fd = out.as_raw_fd();
        Self { out, fd }
    }
}

impl<W: Write> ITerm<W> {
    /// Write frames to `out`, querying the size of the terminal on `fd`.
    #[must_use]
    pub fn new(out: W, fd: RawFd) -> Self {
        Self { out, fd }
    }

    fn emit(&mut self, parts: &[&[u8]]) -> Result<(), Error> {
        for part in parts {
            self.out.write_all(part)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Screen for ITerm<W> {
    fn size(&mut self) -> Result<Geometry, Error> {
        window_size(self.fd)
    }

    fn prepare(&mut self) -> Result<(), Error> {
        // Clear the screen, home the cursor and switch to a bar cursor.
        self.emit(&[b"\x1b[H\x1b[2J", b"\x1b]1337;CursorShape=1\x07"])
    }

    fn draw(&mut self, png: &[u8]) -> Result<(), Error> {
        let encoded = STANDARD.encode(png);
        debug!("drawing {len} byte frame", len = png.len());
        self.emit(&[
            b"\x1b[1;1H",
            b"\x1b]1337;File=preserveAspectRatio=1;inline=1:",
            encoded.as_bytes(),
            b"\x07",
        ])
    }

    fn clear_scrollback(&mut self) -> Result<(), Error> {
        self.emit(&[b"\x1b]1337;ClearScrollback\x07"])
    }
}
