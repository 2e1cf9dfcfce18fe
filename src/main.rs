#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
#![deny(unsafe_code)]

use std::time::Instant;

use anyhow::{bail, ensure, Context};
use clap::{ArgAction, Parser};
use log::info;
use m68k_vectors::{
    irq::{IrqAction, IrqError, IrqReturn, IRQ_AUTO_1, IRQ_AUTO_7, IRQ_USER, NR_IRQS},
    machine::BootError,
    memory::{AccessStats, Fault},
    of::{self, DeviceNode, VECTOR_RANGE},
    vectors::TableSize,
    Config, CpuModel, Machine, TrapFrame,
};
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    long_about = None,
)]
struct Args {
    #[arg(short, long, value_name = "MODEL", default_value_t = CpuModel::Mc68000)]
    /// cpu model; selects the memcpy strategies and the bus alignment rules
    cpu: CpuModel,

    #[arg(long, value_name = "64|256", default_value = "256")]
    /// number of vector table slots
    vectors: TableSize,

    #[arg(long, value_name = "INT", default_value_t = NR_IRQS)]
    /// logical irq capacity
    nr_irqs: u32,

    #[arg(long, value_name = "COMPATIBLE")]
    /// interrupt controller nodes to probe, in order
    /// if not provided, the vector controller matching the cpu is used
    intc: Vec<String>,

    #[arg(long, value_name = "FIRST:COUNT")]
    /// add a user vector controller owning vectors FIRST..FIRST+COUNT
    user: Option<String>,

    #[arg(long, value_name = "OFFSET")]
    /// deliver a trap with this format word vector offset (vector * 4)
    trap: Vec<String>,

    #[arg(long, value_name = "DST,SRC,LEN")]
    /// memcpy on a patterned bus and check the result
    copy: Vec<String>,

    #[arg(long = "move", value_name = "DST,SRC,LEN")]
    /// memmove on a patterned bus and check the result
    move_: Vec<String>,

    #[arg(short, long)]
    /// output timing and bus statistics after the run
    bench: bool,

    #[arg(short, long, action = ArgAction::Count)]
    /// more log output (-v debug, -vv trace)
    verbose: u8,
}

#[derive(Debug, Error)]
enum CliErr {
    #[error("{0}")]
    ArgParse(clap::Error),
    #[error("{0:#}")]
    BadArg(anyhow::Error),
    #[error("{0}")]
    Boot(BootError),
    #[error("{0}")]
    Irq(IrqError),
    #[error("{0}")]
    Fault(Fault),
    #[error("{op} {dst:#x} <- {src:#x} ({len} bytes): first mismatch at byte {at}")]
    Mismatch { op: &'static str, dst: u32, src: u32, len: u32, at: usize },
}
impl From<clap::Error> for CliErr {
    fn from(value: clap::Error) -> Self { Self::ArgParse(value) }
}
impl From<anyhow::Error> for CliErr {
    fn from(value: anyhow::Error) -> Self { Self::BadArg(value) }
}
impl From<BootError> for CliErr {
    fn from(value: BootError) -> Self { Self::Boot(value) }
}
impl From<IrqError> for CliErr {
    fn from(value: IrqError) -> Self { Self::Irq(value) }
}
impl From<Fault> for CliErr {
    fn from(value: Fault) -> Self { Self::Fault(value) }
}

#[derive(Debug, Default)]
struct RunStats {
    elapsed: f64,
    traps:   usize,
    copied:  u64,
    bus:     AccessStats,
}
impl RunStats {
    fn traps_per_sec(&self) -> f64 { self.traps as f64 / self.elapsed }
    fn bytes_per_sec(&self) -> f64 { self.copied as f64 / self.elapsed }
}

fn parse_hex_or_dec(s: &str) -> anyhow::Result<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).with_context(|| format!("invalid hex number \"{s}\""))
    } else {
        s.parse::<u32>().with_context(|| format!("invalid decimal number \"{s}\""))
    }
}

fn parse_user(s: &str) -> anyhow::Result<(u32, u32)> {
    let Some((first, count)) = s.split_once(':') else {
        bail!("user vectors must be given as FIRST:COUNT, got \"{s}\"");
    };
    Ok((parse_hex_or_dec(first)?, parse_hex_or_dec(count)?))
}

fn parse_copy(s: &str) -> anyhow::Result<(u32, u32, u32)> {
    let fields = s.split(',').map(parse_hex_or_dec).collect::<anyhow::Result<Vec<_>>>()?;
    let &[dst, src, len] = fields.as_slice() else {
        bail!("copies must be given as DST,SRC,LEN, got \"{s}\"");
    };
    Ok((dst, src, len))
}

fn parse_trap(s: &str) -> anyhow::Result<TrapFrame> {
    let offset = parse_hex_or_dec(s)?;
    ensure!(offset <= 0xFFF, "vector offset {offset:#x} does not fit the format word");
    Ok(TrapFrame::new(offset as u16))
}

fn device_nodes(args: &Args) -> anyhow::Result<Vec<DeviceNode>> {
    let flavour = if args.cpu == CpuModel::Mc68000 { "mc68000" } else { "mc68010" };
    let mut nodes: Vec<_> = if args.intc.is_empty() {
        let compatible = format!("motorola,{flavour}-intc-vect");
        vec![DeviceNode::new("intc", &[compatible.as_str()])]
    } else {
        args.intc.iter().enumerate().map(|(i, c)| DeviceNode::new(format!("intc{i}"), &[c.as_str()])).collect()
    };
    if let Some(user) = &args.user {
        let (first, count) = parse_user(user)?;
        let compatible = format!("motorola,{flavour}-intc-user");
        nodes.push(DeviceNode::new("user-intc", &[compatible.as_str()]).with_prop(VECTOR_RANGE, &[first, count]));
    }
    Ok(nodes)
}

/// Every irq the controllers made available gets an action that just
/// reports itself.
fn claim_irqs(machine: &mut Machine) -> Result<(), IrqError> {
    let mut irqs = Vec::new();
    if machine.auto_domain().is_some() {
        irqs.extend(IRQ_AUTO_1..=IRQ_AUTO_7);
    }
    if let Some(window) = machine.user_vectors() {
        irqs.extend(IRQ_USER..IRQ_USER + window.count);
    }
    for irq in irqs {
        machine.request_irq(
            irq,
            IrqAction::new(format!("cli-{irq}"), |irq| {
                info!("irq {irq}: handled");
                IrqReturn::Handled
            }),
        )?;
    }
    Ok(())
}

fn check_copy(machine: &mut Machine, op: &'static str, (dst, src, len): (u32, u32, u32)) -> Result<AccessStats, CliErr> {
    machine.memory_mut().fill_pattern((dst ^ src ^ len) as u8);
    let expected = machine.memory().slice(src, len)?.to_vec();
    machine.memory_mut().reset_stats();
    if op == "memcpy" {
        machine.memcpy(dst, src, len)?;
    } else {
        machine.memmove(dst, src, len)?;
    }
    let stats = machine.memory().stats();
    let copied = machine.memory().slice(dst, len)?;
    if let Some(at) = copied.iter().zip(&expected).position(|(a, b)| a != b) {
        return Err(CliErr::Mismatch { op, dst, src, len, at });
    }
    println!(
        "{op} {dst:#x} <- {src:#x} ({len} bytes): ok, {} bus cycles ({} byte, {} word, {} long, {} line)",
        stats.total(),
        stats.byte,
        stats.word,
        stats.long,
        stats.line
    );
    Ok(stats)
}

fn vectors_main() -> Result<(), CliErr> {
    let args = Args::try_parse()?;
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = Config {
        cpu: args.cpu,
        table: args.vectors,
        nr_irqs: args.nr_irqs,
        ..Config::default()
    };
    let mut machine = Machine::boot(config)?;
    let nodes = device_nodes(&args)?;
    let up = of::irqchip_init(&mut machine, &nodes);
    info!("{up} of {} interrupt controllers up", nodes.len());
    claim_irqs(&mut machine)?;

    let frames = args.trap.iter().map(|s| parse_trap(s)).collect::<anyhow::Result<Vec<_>>>()?;
    let copies = args.copy.iter().map(|s| parse_copy(s)).collect::<anyhow::Result<Vec<_>>>()?;
    let moves = args.move_.iter().map(|s| parse_copy(s)).collect::<anyhow::Result<Vec<_>>>()?;

    let mut stats = RunStats::default();
    let start = Instant::now();
    for frame in &frames {
        let outcome = machine.take_trap(frame);
        println!("vector {:3} (offset {:#05x}): {outcome:?}", frame.vector_number(), frame.vector_offset());
        stats.traps += 1;
    }
    for (op, requests) in [("memcpy", &copies), ("memmove", &moves)] {
        for &request in requests {
            let bus = check_copy(&mut machine, op, request)?;
            stats.copied += u64::from(request.2);
            stats.bus.byte += bus.byte;
            stats.bus.word += bus.word;
            stats.bus.long += bus.long;
            stats.bus.line += bus.line;
        }
    }
    stats.elapsed = start.elapsed().as_secs_f64();

    if args.bench {
        println!("\ttime      : {}s", stats.elapsed);
        println!("\ttraps     : {}", stats.traps);
        println!("\ttraps/s   : {:.3}", stats.traps_per_sec());
        println!("\tcopied    : {} bytes", stats.copied);
        println!("\tbytes/s   : {:.3}", stats.bytes_per_sec());
        println!("\tbus cycles: {}", stats.bus.total());
        println!("\tbad irqs  : {}", machine.irq_err_count());
        println!("\ticache    : {} flushes", machine.vectors().icache_flushes());
    }
    Ok(())
}

fn main() {
    match vectors_main() {
        Ok(()) => {}
        Err(err) => println!("{err}"),
    }
}
