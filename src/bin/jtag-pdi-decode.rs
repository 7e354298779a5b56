use anyhow::{bail, Context, Result};
use jtag_pdi::{Decoder, DecoderError, DecoderOptions, GraphKind, TapGraph};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Decodes Atmel PDI traffic tunneled over JTAG from a recording of sampled JTAG pins. Each input byte is one rising TCK edge: bit 0 TMS, bit 1 TDI, bit 2 TDO, bit 3 SRST."
)]
struct Opt {
    #[structopt(long = "--ignore-eof")]
    ignore_eof: bool,

    #[structopt(
        long = "--frames",
        help = "Write the tagged frame stream instead of printing events"
    )]
    frames: bool,

    #[structopt(
        short,
        long,
        parse(from_os_str),
        help = "Where to write the frame stream (default: stdout)"
    )]
    output: Option<PathBuf>,

    #[structopt(
        long = "--ieee-graph",
        help = "Follow the IEEE 1149.1 TAP graph (CAPTURE-xR -> SHIFT-xR on TMS=0)"
    )]
    ieee_graph: bool,

    #[structopt(
        long = "--select-ir-quirk",
        help = "Route SELECT-IR to CAPTURE-DR on TMS=0 (leaves the IR column unreachable)"
    )]
    select_ir_quirk: bool,

    #[structopt(long = "--ticks-per-edge", default_value = "4")]
    ticks_per_edge: u32,

    #[structopt(long = "--emit-errors", help = "Emit 0x1f frames for parity errors")]
    emit_errors: bool,

    #[structopt(
        long = "--expect-malformed",
        help = "Report malformed samples and keep going instead of stopping"
    )]
    expect_malformed: bool,

    #[structopt(name = "FILE", parse(from_os_str), help = "Raw sample input file.")]
    file: PathBuf,
}

fn init_logging() {
    env_logger::Builder::new()
        .format(|buf, r| {
            writeln!(
                buf,
                "{time} {lvl} {module} @{file}:{line}\n  {args}",
                time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f_UTC"),
                lvl = r.level(),
                module = r.module_path().unwrap_or("?"),
                file = r.file().unwrap_or("?"),
                line = r.line().unwrap_or(0),
                args = r.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let opt = Opt::from_args();

    if opt.output.is_some() && !opt.frames {
        bail!("--output only applies together with --frames");
    }

    let file = File::open(&opt.file).with_context(|| format!("Failed to open {:?}", opt.file))?;
    let mut decoder = Decoder::new(
        file,
        DecoderOptions {
            graph: TapGraph {
                kind: if opt.ieee_graph {
                    GraphKind::Ieee1149
                } else {
                    GraphKind::Captured
                },
                select_ir_quirk: opt.select_ir_quirk,
            },
            ticks_per_edge: opt.ticks_per_edge,
            ignore_eof: opt.ignore_eof,
            emit_errors: opt.emit_errors,
        },
    );

    if opt.frames {
        let sink: Box<dyn Write> = match &opt.output {
            Some(path) => Box::new(
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
            ),
            None => Box::new(io::stdout()),
        };
        decoder
            .write_frames(BufWriter::new(sink))
            .context("Decoder error")?;
    } else {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        let mut it = decoder.events();

        loop {
            match it.next() {
                None => break, // EOF
                Some(Err(DecoderError::MalformedSample(m))) if opt.expect_malformed => {
                    log::warn!("{}", m);
                }
                Some(Err(e)) => return Err(e).context("Decoder error"),
                Some(Ok(event)) => writeln!(stdout, "{:?}", event)?,
            }
        }
    }

    log::info!(
        "{} samples read, {} PDI frame(s) and {} IDCODE update(s) dropped",
        decoder.samples_read(),
        decoder.dropped_frames(),
        decoder.dropped_idcodes()
    );

    Ok(())
}
