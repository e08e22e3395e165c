//! Interactive commands accepted on stdin while watching.

use std::str::FromStr;

use crate::context::QualityPreset;
use crate::lifecycle::{Viewport, Visibility};

pub const HELP: &str = "\
Commands:
  r             refresh the stream
  t             toggle forced variant (fast/normal)
  q <preset>    quality preset: fast, normal or auto
  g             start the stream
  x             stop the stream
  s             show stream status
  d             show diagnostics
  b             measure bandwidth again
  v / h         simulate page visible / hidden
  w <W>x<H>     simulate a viewport resize
  c             toggle the camera on or off
  p             save a snapshot
  ?             show this help
  quit          unload and exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Refresh,
    ToggleVariant,
    Quality(QualityPreset),
    Start,
    Stop,
    Status,
    Diagnostics,
    Probe,
    Visibility(Visibility),
    Resize(Viewport),
    ToggleCamera,
    Snapshot,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut words = input.split_whitespace();
        let command = words.next().unwrap_or_default();
        let argument = words.next();

        let parsed = match command {
            "r" | "refresh" => Self::Refresh,
            "t" | "toggle" => Self::ToggleVariant,
            "q" | "quality" => {
                let preset = argument.ok_or("usage: q <fast|normal|auto>")?;
                Self::Quality(
                    preset
                        .parse()
                        .map_err(|_| format!("unknown quality preset '{preset}'"))?,
                )
            }
            "g" | "start" => Self::Start,
            "x" | "stop" => Self::Stop,
            "s" | "status" => Self::Status,
            "d" | "diag" => Self::Diagnostics,
            "b" | "probe" => Self::Probe,
            "v" | "visible" => Self::Visibility(Visibility::Visible),
            "h" | "hidden" => Self::Visibility(Visibility::Hidden),
            "w" | "resize" => Self::Resize(parse_viewport(
                argument.ok_or("usage: w <width>x<height>")?,
            )?),
            "c" | "camera" => Self::ToggleCamera,
            "p" | "snapshot" => Self::Snapshot,
            "?" | "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}', type ? for help")),
        };
        Ok(parsed)
    }
}

fn parse_viewport(value: &str) -> Result<Viewport, String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected <width>x<height>, got '{value}'"))?;
    let width = width
        .parse()
        .map_err(|_| format!("invalid width '{width}'"))?;
    let height = height
        .parse()
        .map_err(|_| format!("invalid height '{height}'"))?;
    Ok(Viewport { width, height })
}
