// Command-line front end for vcdelta.
//
// `encode` turns an input into a delta against a dictionary, one window per
// `--window-size` bytes of input.  `decode` feeds a delta to the streaming
// decoder in `--chunk-size` pieces.  `inspect` walks the headers of a delta
// and prints a per-window summary without needing the dictionary.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use log::LevelFilter;

use crate::engine::{EncodeOptions, FormatFlags, StreamingEncoder};
use crate::hash::DictionaryIndex;
use crate::vcdiff::address_cache::AddressCache;
use crate::vcdiff::code_table::{
    CODE_TABLE_BYTES, CodeTable, DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE, Instruction,
};
use crate::vcdiff::cursor::Cursor;
use crate::vcdiff::decoder::{
    DEFAULT_MAX_TARGET_FILE_SIZE, DEFAULT_MAX_TARGET_WINDOW_SIZE, DecoderConfig, StreamingDecoder,
    decode_memory,
};
use crate::vcdiff::error::{ParseError, ParseResult};
use crate::vcdiff::header::{
    FileHeader, HeaderParser, SectionLengths, SourceSegment, Version, WinIndicator,
};
use crate::vcdiff::reader::CodeTableReader;
use crate::vcdiff::varint;

const BUF_SIZE: usize = 64 * 1024;

/// Input bytes per encoded window.
const DEFAULT_WINDOW_SIZE: u64 = 1 << 20;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

fn parse_nonzero_size(s: &str) -> Result<u64, String> {
    match parse_byte_size(s)? {
        0 => Err("size must be greater than zero".into()),
        n => Ok(n),
    }
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// VCDIFF (RFC 3284) delta encoder/decoder with SDCH extensions.
#[derive(Parser, Debug)]
#[command(
    name = "vcdelta",
    version,
    about = "VCDIFF delta encoder/decoder",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print stats as JSON to stderr.
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Encode an input as a delta against a dictionary.
    Encode(EncodeArgs),
    /// Rebuild the input from a dictionary and a delta.
    Decode(DecodeArgs),
    /// Print the header and a summary of every window of a delta.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Dictionary file (default: empty dictionary).
    #[arg(long, short = 'd', value_hint = ValueHint::FilePath)]
    dictionary: Option<PathBuf>,

    /// Write interleaved windows (SDCH format).
    #[arg(long)]
    interleaved: bool,

    /// Add an Adler-32 checksum to every window (SDCH format).
    #[arg(long)]
    checksum: bool,

    /// Also match against earlier bytes of the same window.
    #[arg(long = "target-matches")]
    target_matches: bool,

    /// Copy from the previous window's output instead of the dictionary.
    #[arg(long = "vcd-target")]
    vcd_target: bool,

    /// Write a JSON array of instructions instead of VCDIFF.
    #[arg(long, conflicts_with_all = ["interleaved", "checksum"])]
    json: bool,

    /// Input bytes per window (supports K/M/G suffix).
    #[arg(long = "window-size", value_parser = parse_nonzero_size, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: u64,

    /// Input file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Dictionary file (default: empty dictionary).
    #[arg(long, short = 'd', value_hint = ValueHint::FilePath)]
    dictionary: Option<PathBuf>,

    /// Largest accepted target window (supports K/M/G suffix).
    #[arg(long = "max-window-size", value_parser = parse_byte_size, default_value_t = DEFAULT_MAX_TARGET_WINDOW_SIZE)]
    max_window_size: u64,

    /// Largest accepted decoded output (supports K/M/G suffix).
    #[arg(long = "max-file-size", value_parser = parse_byte_size, default_value_t = DEFAULT_MAX_TARGET_FILE_SIZE)]
    max_file_size: u64,

    /// Reject windows that copy from earlier output (VCD_TARGET).
    #[arg(long = "no-vcd-target")]
    no_vcd_target: bool,

    /// Delta bytes handed to the decoder per call (supports K/M/G suffix).
    #[arg(long = "chunk-size", value_parser = parse_nonzero_size, default_value_t = BUF_SIZE as u64)]
    chunk_size: u64,

    /// Input delta file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Delta file.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

fn read_dictionary(path: Option<&Path>) -> Result<Vec<u8>, String> {
    match path {
        Some(path) => {
            std::fs::read(path).map_err(|e| format!("dictionary file: {}: {e}", path.display()))
        }
        None => Ok(Vec::new()),
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>, String> {
    match path {
        Some(path) => File::open(path)
            .map(|f| Box::new(BufReader::with_capacity(BUF_SIZE, f)) as Box<dyn Read>)
            .map_err(|e| format!("input file: {}: {e}", path.display())),
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn open_output(path: Option<&Path>, force: bool) -> Result<Box<dyn Write>, String> {
    match path {
        None => Ok(Box::new(BufWriter::with_capacity(
            BUF_SIZE,
            io::stdout().lock(),
        ))),
        Some(path) => {
            if path.exists() && !force {
                return Err(format!(
                    "output file exists, use -f to overwrite: {}",
                    path.display()
                ));
            }
            File::create(path)
                .map(|f| Box::new(BufWriter::with_capacity(BUF_SIZE, f)) as Box<dyn Write>)
                .map_err(|e| format!("output file: {}: {e}", path.display()))
        }
    }
}

/// Read up to `buf.len()` bytes, stopping early only at end of input.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn print_stats(stats: &serde_json::Value) {
    match serde_json::to_string_pretty(stats) {
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("vcdelta: stats: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Encode command
// ---------------------------------------------------------------------------

fn encode_options(args: &EncodeArgs) -> EncodeOptions {
    let mut format = FormatFlags::empty();
    format.set(FormatFlags::INTERLEAVED, args.interleaved);
    format.set(FormatFlags::CHECKSUM, args.checksum);
    format.set(FormatFlags::JSON, args.json);
    EncodeOptions {
        format,
        look_for_target_matches: args.target_matches,
        vcd_target: args.vcd_target,
        code_table: None,
    }
}

fn cmd_encode(cli: &Cli, args: &EncodeArgs) -> Result<(), String> {
    let dictionary = read_dictionary(args.dictionary.as_deref())?;
    let mut input = open_input(args.input.as_deref())?;
    let mut output = open_output(args.output.as_deref(), cli.force)?;

    let dictionary_size = dictionary.len();
    let index = Arc::new(DictionaryIndex::new(&dictionary));
    drop(dictionary);
    let mut encoder = StreamingEncoder::new(index, encode_options(args));

    let window_size = usize::try_from(args.window_size).unwrap_or(usize::MAX);
    let mut buf = vec![0u8; window_size.min(1 << 30)];
    let mut delta = Vec::with_capacity(BUF_SIZE);
    let mut total_out = 0u64;

    encoder
        .start_encoding(&mut delta)
        .map_err(|e| format!("encode error: {e}"))?;
    loop {
        let n = read_full(input.as_mut(), &mut buf).map_err(|e| format!("read error: {e}"))?;
        if n == 0 {
            break;
        }
        encoder
            .encode_chunk(&buf[..n], &mut delta)
            .map_err(|e| format!("encode error: {e}"))?;
        output
            .write_all(&delta)
            .map_err(|e| format!("write error: {e}"))?;
        total_out += delta.len() as u64;
        delta.clear();
        if n < buf.len() {
            break;
        }
    }
    encoder
        .finish_encoding(&mut delta)
        .map_err(|e| format!("encode error: {e}"))?;
    output
        .write_all(&delta)
        .and_then(|()| output.flush())
        .map_err(|e| format!("write error: {e}"))?;
    total_out += delta.len() as u64;

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "vcdelta: encoder: dictionary size: {dictionary_size}, input size: {}, \
             output size: {total_out}, windows: {}",
            encoder.target_bytes(),
            encoder.windows()
        );
    }
    if cli.stats {
        print_stats(&serde_json::json!({
            "command": "encode",
            "dictionary_size": dictionary_size,
            "input_size": encoder.target_bytes(),
            "output_size": total_out,
            "windows": encoder.windows(),
            "version": match encoder.options().version() {
                Version::Standard => "standard",
                Version::Sdch => "sdch",
            },
        }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decode command
// ---------------------------------------------------------------------------

/// Counts bytes written through it.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn decoder_config(args: &DecodeArgs) -> DecoderConfig {
    DecoderConfig {
        max_target_window_size: args.max_window_size,
        max_target_file_size: args.max_file_size,
        allow_vcd_target: !args.no_vcd_target,
        ..DecoderConfig::default()
    }
}

fn cmd_decode(cli: &Cli, args: &DecodeArgs) -> Result<(), String> {
    let dictionary = read_dictionary(args.dictionary.as_deref())?;
    let mut input = open_input(args.input.as_deref())?;
    let mut output = CountingWriter {
        inner: open_output(args.output.as_deref(), cli.force)?,
        written: 0,
    };

    let mut decoder = StreamingDecoder::with_config(decoder_config(args));
    decoder
        .start_decoding(&dictionary)
        .map_err(|e| format!("decode error: {e}"))?;

    let chunk_size = usize::try_from(args.chunk_size).unwrap_or(usize::MAX);
    let mut buf = vec![0u8; chunk_size.min(1 << 30)];
    let mut total_in = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(format!("read error: {e}")),
        };
        total_in += n as u64;
        decoder
            .decode_chunk(&buf[..n], &mut output)
            .map_err(|e| format!("decode error: {e}"))?;
    }
    decoder
        .finish_decoding()
        .map_err(|e| format!("decode error: {e}"))?;
    output.flush().map_err(|e| format!("write error: {e}"))?;

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "vcdelta: decoder: dictionary size: {}, input size: {total_in}, output size: {}",
            dictionary.len(),
            output.written
        );
    }
    if cli.stats {
        print_stats(&serde_json::json!({
            "command": "decode",
            "dictionary_size": dictionary.len(),
            "input_size": total_in,
            "output_size": output.written,
        }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspect command
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct InstructionCounts {
    adds: u64,
    add_bytes: u64,
    runs: u64,
    run_bytes: u64,
    copies: u64,
    copy_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WindowSummary {
    offset: u64,
    segment: SourceSegment,
    target_length: u32,
    sections: SectionLengths,
    interleaved: bool,
    counts: InstructionCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeltaSummary {
    header: FileHeader,
    /// Size of the nested code table delta, if any.
    code_table_delta: Option<usize>,
    windows: Vec<WindowSummary>,
}

fn malformed(offset: u64, err: ParseError) -> String {
    match err {
        ParseError::NeedMoreData => format!("delta truncated at offset {offset}"),
        ParseError::Malformed(kind) => format!("malformed delta at offset {offset}: {kind}"),
    }
}

/// Count the instructions of one window body.  Interleaved bodies carry
/// data and addresses inline, which are skipped.
fn count_instructions(
    table: &Arc<CodeTable>,
    first_same_mode: u8,
    mut body: Cursor<'_>,
    interleaved: bool,
) -> ParseResult<InstructionCounts> {
    let mut reader = CodeTableReader::new(Arc::clone(table));
    let mut counts = InstructionCounts::default();
    while let Some(inst) = reader.next_instruction(&mut body)? {
        let size = u64::from(inst.size());
        match inst {
            Instruction::Add { size: len } => {
                counts.adds += 1;
                counts.add_bytes += size;
                if interleaved {
                    body.read_bytes(len as usize)?;
                }
            }
            Instruction::Run { .. } => {
                counts.runs += 1;
                counts.run_bytes += size;
                if interleaved {
                    body.read_byte()?;
                }
            }
            Instruction::Copy { mode, .. } => {
                counts.copies += 1;
                counts.copy_bytes += size;
                if interleaved {
                    if mode >= first_same_mode {
                        body.read_byte()?;
                    } else {
                        varint::parse_int32(&mut body)?;
                    }
                }
            }
        }
    }
    Ok(counts)
}

fn parse_window_header(
    parser: &mut HeaderParser<'_>,
    version: Version,
    decoded: u64,
) -> ParseResult<(SourceSegment, u32, SectionLengths)> {
    let (win, segment) = parser.parse_win_indicator_and_source_segment(u64::MAX, decoded, true)?;
    let target_length = parser.parse_window_lengths()?;
    parser.parse_delta_indicator()?;
    let has_checksum = version.has_extensions() && win.contains(WinIndicator::CHECKSUM);
    let sections = parser.parse_section_lengths(has_checksum)?;
    Ok((segment, target_length, sections))
}

/// Walk windows until the input ends or `stop_after` target bytes have
/// been described.
fn walk_windows(
    cursor: &mut Cursor<'_>,
    version: Version,
    table: &Arc<CodeTable>,
    first_same_mode: u8,
    stop_after: Option<u64>,
) -> Result<Vec<WindowSummary>, String> {
    let mut windows = Vec::new();
    let mut decoded = 0u64;
    while !cursor.is_empty() && stop_after.is_none_or(|limit| decoded < limit) {
        let offset = cursor.offset();
        let mut parser = HeaderParser::new(*cursor);
        let (segment, target_length, sections) = parse_window_header(&mut parser, version, decoded)
            .map_err(|e| malformed(parser.offset(), e))?;

        let mut body = parser.cursor();
        if body.remaining_len() < sections.total() {
            return Err(malformed(body.offset(), ParseError::NeedMoreData));
        }
        let interleaved =
            version.has_extensions() && sections.data == 0 && sections.addresses == 0;
        let mut inst = body;
        inst.advance(sections.data as usize);
        let inst = inst.window(sections.instructions as usize);
        let counts = count_instructions(table, first_same_mode, inst, interleaved)
            .map_err(|e| malformed(inst.offset(), e))?;
        body.advance(sections.total());
        *cursor = body;

        decoded += u64::from(target_length);
        windows.push(WindowSummary {
            offset,
            segment,
            target_length,
            sections,
            interleaved,
            counts,
        });
    }
    Ok(windows)
}

fn inspect_delta(delta: &[u8]) -> Result<DeltaSummary, String> {
    let mut cursor = Cursor::new(delta);
    let header = FileHeader::parse(&mut cursor).map_err(|e| malformed(cursor.offset(), e))?;

    let default_cache = AddressCache::new(DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE)
        .map_err(|e| e.to_string())?;
    let mut table = CodeTable::default_table();
    let mut first_same_mode = default_cache.first_same_mode();
    let mut code_table_delta = None;

    if let Some((near, same)) = header.custom_cache_sizes {
        let cache = AddressCache::new(near, same).map_err(|e| malformed(cursor.offset(), e.into()))?;
        let start = cursor.position();
        let nested = FileHeader::parse(&mut cursor).map_err(|e| malformed(cursor.offset(), e))?;
        walk_windows(
            &mut cursor,
            nested.version,
            &CodeTable::default_table(),
            default_cache.first_same_mode(),
            Some(CODE_TABLE_BYTES as u64),
        )?;
        let nested_delta = &delta[start..cursor.position()];
        let bytes = decode_memory(CodeTable::default_table_bytes(), nested_delta)
            .map_err(|e| format!("code table: {e}"))?;
        let custom = CodeTable::from_bytes(&bytes).map_err(|e| format!("code table: {e}"))?;
        custom
            .validate(cache.max_mode())
            .map_err(|e| format!("code table: {e}"))?;
        table = Arc::new(custom);
        first_same_mode = cache.first_same_mode();
        code_table_delta = Some(nested_delta.len());
    }

    let windows = walk_windows(&mut cursor, header.version, &table, first_same_mode, None)?;
    Ok(DeltaSummary {
        header,
        code_table_delta,
        windows,
    })
}

fn describe_segment(segment: &SourceSegment) -> String {
    match *segment {
        SourceSegment::None => "none".into(),
        SourceSegment::Dictionary { position, length } => {
            format!("dictionary [{position}, {})", position + length)
        }
        SourceSegment::Target { position, length } => {
            format!("target [{position}, {})", position + length)
        }
    }
}

fn print_summary(out: &mut dyn Write, summary: &DeltaSummary) -> io::Result<()> {
    let version = summary.header.version;
    writeln!(
        out,
        "VCDIFF version:       {:#04x} ({})",
        version.byte(),
        match version {
            Version::Standard => "RFC 3284",
            Version::Sdch => "SDCH",
        }
    )?;
    match (summary.header.custom_cache_sizes, summary.code_table_delta) {
        (Some((near, same)), Some(len)) => writeln!(
            out,
            "code table:           custom (near {near}, same {same}, {len} byte delta)"
        )?,
        _ => writeln!(out, "code table:           default")?,
    }
    writeln!(out, "windows:              {}", summary.windows.len())?;
    for (n, w) in summary.windows.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "window {n} at offset {}:", w.offset)?;
        writeln!(out, "  source segment:     {}", describe_segment(&w.segment))?;
        writeln!(out, "  target length:      {}", w.target_length)?;
        if w.interleaved {
            writeln!(out, "  interleaved:        {} bytes", w.sections.instructions)?;
        } else {
            writeln!(
                out,
                "  sections:           data {}, instructions {}, addresses {}",
                w.sections.data, w.sections.instructions, w.sections.addresses
            )?;
        }
        if let Some(checksum) = w.sections.checksum {
            writeln!(out, "  adler32:            {checksum:08x}")?;
        }
        let c = &w.counts;
        writeln!(
            out,
            "  instructions:       add {} ({} bytes), copy {} ({} bytes), run {} ({} bytes)",
            c.adds, c.add_bytes, c.copies, c.copy_bytes, c.runs, c.run_bytes
        )?;
    }
    Ok(())
}

fn cmd_inspect(cli: &Cli, args: &InspectArgs) -> Result<(), String> {
    let delta = std::fs::read(&args.delta)
        .map_err(|e| format!("delta file: {}: {e}", args.delta.display()))?;
    let summary = inspect_delta(&delta)?;

    let mut out = io::stdout().lock();
    print_summary(&mut out, &summary)
        .and_then(|()| out.flush())
        .map_err(|e| format!("write error: {e}"))?;

    if cli.stats {
        let target_size: u64 = summary
            .windows
            .iter()
            .map(|w| u64::from(w.target_length))
            .sum();
        print_stats(&serde_json::json!({
            "command": "inspect",
            "delta_size": delta.len(),
            "windows": summary.windows.len(),
            "target_size": target_size,
        }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

fn log_level(cli: &Cli) -> LevelFilter {
    match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("vcdelta".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = log_level(&cli);
        if let Cmd::Encode(args) = &cli.command {
            let _ = encode_options(args).version();
        }
        if let Cmd::Decode(args) = &cli.command {
            let _ = decoder_config(args);
        }
    }
}

/// Parse arguments, run the command, and exit with its status.
pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level(&cli).as_str()),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let result = match &cli.command {
        Cmd::Encode(args) => cmd_encode(&cli, args),
        Cmd::Decode(args) => cmd_decode(&cli, args),
        Cmd::Inspect(args) => cmd_inspect(&cli, args),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(msg) => {
            eprintln!("vcdelta: {msg}");
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
