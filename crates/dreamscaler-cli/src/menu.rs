//! Interactive menu

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use dreamscaler_core::protocol::Connection;

use crate::demos::{self, DemoContext, Effect};

/// Effect length inside "run all"
const RUN_ALL_EFFECT_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ping,
    Info,
    SingleLeds,
    Basic,
    Ranges,
    Gradients,
    Brightness,
    Effect(Effect),
    PianoLayout,
    Performance,
    RunAll,
    Clear,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::Ping => "Ping test",
            Action::Info => "Device info",
            Action::SingleLeds => "Single LED test",
            Action::Basic => "Basic control",
            Action::Ranges => "LED ranges",
            Action::Gradients => "Gradients",
            Action::Brightness => "Brightness fade",
            Action::Effect(effect) => effect.name(),
            Action::PianoLayout => "Piano layout",
            Action::Performance => "Performance test",
            Action::RunAll => "Run all demos",
            Action::Clear => "Clear all LEDs",
        }
    }

    pub fn run(self, conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
        match self {
            Action::Ping => demos::ping(conn),
            Action::Info => demos::device_info(conn, ctx),
            Action::SingleLeds => demos::single_leds(conn, ctx),
            Action::Basic => demos::basic(conn, ctx),
            Action::Ranges => demos::ranges(conn, ctx),
            Action::Gradients => demos::gradients(conn, ctx),
            Action::Brightness => demos::brightness(conn, ctx),
            Action::Effect(effect) => demos::effect(conn, ctx, effect, ctx.effect_duration),
            Action::PianoLayout => demos::piano_layout(conn, ctx),
            Action::Performance => demos::performance(conn, ctx),
            Action::RunAll => run_all(conn, ctx),
            Action::Clear => Ok(conn.clear_all()?),
        }
    }
}

/// Menu sections in display order; numbering runs across sections from 1
pub const SECTIONS: &[(&str, &[Action])] = &[
    ("TESTS", &[Action::Ping, Action::Info, Action::SingleLeds]),
    (
        "EXAMPLES",
        &[
            Action::Basic,
            Action::Ranges,
            Action::Gradients,
            Action::Brightness,
        ],
    ),
    (
        "EFFECTS",
        &[
            Action::Effect(Effect::Rainbow),
            Action::Effect(Effect::KnightRider),
            Action::Effect(Effect::Fire),
            Action::Effect(Effect::Sparkle),
            Action::Effect(Effect::Wave),
            Action::Effect(Effect::ColorCycle),
            Action::Effect(Effect::TheaterChase),
        ],
    ),
    (
        "OTHER",
        &[
            Action::PianoLayout,
            Action::Performance,
            Action::RunAll,
            Action::Clear,
        ],
    ),
];

/// All actions in menu order
pub fn actions() -> impl Iterator<Item = Action> {
    SECTIONS.iter().flat_map(|(_, actions)| actions.iter().copied())
}

/// Resolve a menu number. `0` is exit and never an action.
pub fn lookup(choice: usize) -> Option<Action> {
    choice.checked_sub(1).and_then(|i| actions().nth(i))
}

fn print_menu() {
    println!("\n{}", "=".repeat(60));
    println!("DreamScaler USB Controller");
    println!("{}", "=".repeat(60));

    let mut number = 1;
    for (section, actions) in SECTIONS {
        println!("\n{section}");
        for action in *actions {
            println!("{number:>2}. {}", action.label());
            number += 1;
        }
    }
    println!("\n 0. Exit");
    println!("{}", "=".repeat(60));
}

fn run_all(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let sequence: Vec<Action> = actions()
        .filter(|a| !matches!(a, Action::Performance | Action::RunAll | Action::Clear))
        .collect();

    for (i, action) in sequence.iter().enumerate() {
        if !ctx.is_running() {
            break;
        }
        println!("\n[{}/{}] {}", i + 1, sequence.len(), action.label());
        match action {
            Action::Effect(effect) => {
                demos::effect(conn, ctx, *effect, RUN_ALL_EFFECT_DURATION)?
            }
            other => other.run(conn, ctx)?,
        }
        ctx.pause(Duration::from_millis(500));
    }
    Ok(())
}

/// Run one action with the connection locked, reporting failures
pub fn run_action(conn: &Mutex<Connection>, ctx: &DemoContext, action: Action) -> Result<()> {
    println!("\nRunning: {}", action.label());
    let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
    action.run(&mut conn, ctx)
}

/// Prompt until the user picks 0, input ends or the program is stopped
pub fn interactive(conn: &Arc<Mutex<Connection>>, ctx: &DemoContext) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    while ctx.is_running() {
        print_menu();
        print!("\nChoice: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let choice = line.trim();

        if choice == "0" {
            println!("\nExiting...");
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = conn.clear_all() {
                tracing::warn!("clearing strip on exit failed: {e}");
            }
            break;
        }

        match choice.parse::<usize>().ok().and_then(lookup) {
            Some(action) => match run_action(conn, ctx, action) {
                Ok(()) => println!("Done"),
                Err(e) => println!("Error: {e:#}"),
            },
            None => println!("\nInvalid choice"),
        }
    }
    Ok(())
}
