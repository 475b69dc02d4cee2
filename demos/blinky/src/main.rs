//! Blinky on a hosted target
//!
//! One active object with a two-level state machine: `start` owns the
//! `led_on`/`led_off` pair and a periodic time event toggles between them.
//! The idle hook of the cooperative scheduler plays the part of the tick
//! interrupt, and halfway through a pooled `PRESS` event carrying a button
//! number is published to show the event lifecycle.

use std::thread;
use std::time::Duration;

use log::info;
use qp_core::{QError, QEvt, QSignal, QTimeInterval};
use qp_mem::{EventPools, QMPool, QMemContext};
use qp_qep::{QStateReturn, StateDesc, StateId, StateTable};
use qp_qf::{QActiveDef, QHsmActive, QTimeEvt};
use qp_qv::QV;
use tracing_subscriber::EnvFilter;

/// Ticks the demo runs for
const RUN_TICKS: u32 = 20;
/// Ticks between LED toggles
const BLINK_TICKS: u32 = 2;
const TICK: Duration = Duration::from_millis(50);
/// Event queue slots of the blinky active object
const QUEUE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum BlinkySignal {
    Timeout = 16,
    Press = 17,
}

impl From<BlinkySignal> for QSignal {
    fn from(sig: BlinkySignal) -> Self {
        QSignal::new(sig as u16)
    }
}

const TIMEOUT: QSignal = QSignal::new(BlinkySignal::Timeout as u16);
const PRESS: QSignal = QSignal::new(BlinkySignal::Press as u16);

const START: StateId = StateId(1);
const LED_ON: StateId = StateId(2);
const LED_OFF: StateId = StateId(3);

static POOLS: EventPools = EventPools::new();
static MEM: QMemContext = QMemContext::new(1024);

struct Blinky {
    pools: &'static EventPools,
    toggles: u32,
    presses: u32,
}

impl Blinky {
    fn new(pools: &'static EventPools) -> Self {
        Self {
            pools,
            toggles: 0,
            presses: 0,
        }
    }
}

fn start(me: &mut Blinky, e: &QEvt) -> QStateReturn {
    match e.signal() {
        QSignal::INIT => QStateReturn::Transition(LED_ON),
        PRESS => {
            let button = me.pools.read_payload(e, |data| data.first().copied());
            match button {
                Ok(Some(n)) => println!("button {n} pressed"),
                _ => println!("button pressed"),
            }
            me.presses += 1;
            QStateReturn::Handled
        }
        _ => QStateReturn::Unhandled,
    }
}

fn led_on(me: &mut Blinky, e: &QEvt) -> QStateReturn {
    match e.signal() {
        QSignal::ENTRY => {
            println!("LED ON");
            QStateReturn::Handled
        }
        TIMEOUT => {
            me.toggles += 1;
            QStateReturn::Transition(LED_OFF)
        }
        _ => QStateReturn::Unhandled,
    }
}

fn led_off(me: &mut Blinky, e: &QEvt) -> QStateReturn {
    match e.signal() {
        QSignal::ENTRY => {
            println!("LED OFF");
            QStateReturn::Handled
        }
        TIMEOUT => {
            me.toggles += 1;
            QStateReturn::Transition(LED_ON)
        }
        _ => QStateReturn::Unhandled,
    }
}

static BLINKY: [StateDesc<Blinky>; 4] = [
    StateDesc::top(),
    StateDesc::new("start", StateId::TOP, start),
    StateDesc::new("led_on", START, led_on),
    StateDesc::new("led_off", START, led_off),
];

fn main() -> Result<(), QError> {
    // kernel records come in through the `log` facade; BLINKY_LOG=qp_qf=trace
    // and the like narrow them down
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BLINKY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    println!("QP blinky (hosted)");
    POOLS.register(QMPool::new(8, 4)?)?;

    let def: QActiveDef<Blinky, QUEUE_LEN> =
        QActiveDef::builder("blinky", StateTable::new(&BLINKY))
            .priority(1)
            .initial(START)
            .build()?;
    let blinky = QHsmActive::create(&def, Blinky::new(&POOLS), &MEM, &POOLS)?;
    info!("blinky created, {} of {} bytes in use", MEM.used(), MEM.capacity());

    let mut qv = QV::new(&POOLS);
    qv.register(&blinky)?;
    qv.subscribe(def.priority(), BlinkySignal::Press.into())?;

    let timer = QTimeEvt::new(BlinkySignal::Timeout.into());
    timer.arm(QTimeInterval::periodic(BLINK_TICKS))?;

    let mut ticks = 0;
    let mut failure = None;
    qv.run(|| {
        thread::sleep(TICK);
        ticks += 1;
        if let Err(err) = timer.tick(&blinky) {
            failure = Some(err);
            return false;
        }
        if ticks == RUN_TICKS / 2 {
            let press = POOLS.create_with(1, PRESS, |data| data[0] = 1);
            if let Err(err) = press.and_then(|e| qv.publish(&e)) {
                failure = Some(err);
                return false;
            }
        }
        ticks < RUN_TICKS
    })?;
    if let Some(err) = failure {
        return Err(err);
    }

    timer.disarm();
    drop(qv);
    let me = blinky.destroy()?;
    println!("{} toggles, {} presses", me.toggles, me.presses);
    info!("memory in use after destroy: {} bytes", MEM.used());
    Ok(())
}
