//! A2PROFILE - Apple ProFile Hard Disk Controller in Rust
//!
//! ProFileプロトコルをコマンドラインから操作する
//!
//! # 使用方法
//! ```text
//! a2profile info
//! a2profile --log transaction read 12
//! a2profile write 10 --fill 0xA5 --verify
//! ```

use a2profile::command::BlockAddress;
use a2profile::config::{Capacity, ProfileConfig};
use a2profile::host::{HostError, HostResult, ProfileHost};
use a2profile::profile::ProfileDevice;
use a2profile::profile_log;
use a2profile::storage::{Block, BlockStore, MemoryBlockStore, BLOCK_SIZE};
use a2profile::status::StatusWord;
use clap::{Parser, Subcommand};

/// A2PROFILE - Apple ProFile Hard Disk Controller in Rust
#[derive(Parser, Debug)]
#[command(name = "a2profile")]
#[command(author = "A2RS Project")]
#[command(version = "0.1.0")]
#[command(about = "Apple ProFile hard disk protocol controller", long_about = None)]
struct Args {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "a2profile.json")]
    config: String,

    /// プロトコルログ (none, byte, transaction, command, storage, all; '+'で結合)
    #[arg(long, default_value = "none")]
    log: String,

    /// 容量の上書き (5mb, 10mb)
    #[arg(long)]
    capacity: Option<Capacity>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// デバイス情報ブロックを表示
    Info,
    /// ブロックを読み取って16進ダンプ
    Read {
        /// ブロック番号（10進または0x付き16進）
        #[arg(value_parser = parse_number)]
        block: u32,
    },
    /// ブロックを書き込んで読み戻す
    Write {
        #[arg(value_parser = parse_number)]
        block: u32,
        /// 埋めるバイト値
        #[arg(long, value_parser = parse_byte, default_value = "0")]
        fill: u8,
        /// ライトベリファイを使う
        #[arg(long)]
        verify: bool,
    },
    /// 書き込み・読み取り・ベリファイを実行してステートをJSONで出力
    Script,
}

/// 10進または0x付き16進
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("$")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| format!("byte value out of range: {}", s))
}

fn print_status(status: &StatusWord) {
    let bytes = status.to_bytes();
    println!(
        "Status: {:02X} {:02X} {:02X} {:02X}{}",
        bytes[0],
        bytes[1],
        bytes[2],
        bytes[3],
        if status.is_ok() { "" } else { "  (error)" }
    );
}

fn hex_dump(block: &Block) {
    for (row, chunk) in block.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{:04X}: {:<47}  {}", row * 16, hex.join(" "), ascii);
    }
}

fn run_info<S: BlockStore>(device: &mut ProfileDevice<S>) -> HostResult<()> {
    let (status, block) = ProfileHost::new(device).read_device_info()?;
    print_status(&status);
    let name = String::from_utf8_lossy(&block[0..13]);
    let blocks = u32::from_be_bytes([0, block[19], block[20], block[21]]);
    println!("Name:      \"{}\"", name);
    println!("Device:    {:02X}{:02X}{:02X}", block[13], block[14], block[15]);
    println!("Firmware:  {}.{:02}", block[16], block[17]);
    println!("Blocks:    {} (${:06X})", blocks, blocks);
    println!("Block size: {}", u16::from_be_bytes([block[22], block[23]]));
    println!("Spares:    {}", block[24]);
    Ok(())
}

fn run_read<S: BlockStore>(device: &mut ProfileDevice<S>, block: u32) -> HostResult<()> {
    let address = BlockAddress::new(block);
    let (status, data) = ProfileHost::new(device).read_block(address, 0, 0)?;
    println!("Block {}", address);
    print_status(&status);
    hex_dump(&data);
    Ok(())
}

fn run_write<S: BlockStore>(
    device: &mut ProfileDevice<S>,
    block: u32,
    fill: u8,
    verify: bool,
) -> HostResult<()> {
    let address = BlockAddress::new(block);
    let mut host = ProfileHost::new(device);
    let status = host.write_block(address, &[fill; BLOCK_SIZE], verify)?;
    println!("Write{} {}", if verify { "-verify" } else { "" }, address);
    print_status(&status);

    let (status, data) = host.read_block(address, 0, 0)?;
    let matches = data.iter().all(|&b| b == fill);
    println!("Read back {}: {}", address, if matches { "ok" } else { "MISMATCH" });
    print_status(&status);
    Ok(())
}

fn run_script<S: BlockStore>(device: &mut ProfileDevice<S>) -> HostResult<()> {
    let address = BlockAddress::new(0x000010);
    let payload: Vec<u8> = (0..BLOCK_SIZE).map(|i| i as u8).collect();
    {
        let mut host = ProfileHost::new(device);
        let status = host.write_block(address, &payload, false)?;
        log::info!("write {}: {:02X?}", address, status.to_bytes());
        let (status, data) = host.read_block(address, 0, 0)?;
        log::info!(
            "read {}: {:02X?} match={}",
            address,
            status.to_bytes(),
            data[..] == payload[..]
        );
        let status = host.write_block(address, &payload, true)?;
        log::info!("write-verify {}: {:02X?}", address, status.to_bytes());
    }
    match device.snapshot().to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize state: {}", e),
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    match profile_log::parse_log_level(&args.log) {
        Ok(level) => profile_log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }

    let mut config = match ProfileConfig::load_from(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    log::info!(
        "ProFile {:?}: {} blocks, name \"{}\"",
        config.capacity,
        config.block_count(),
        config.device_name
    );

    let result = match args.action {
        Action::Info => run_info(&mut ProfileDevice::with_default_store(&config)),
        Action::Read { block } => {
            run_read(&mut ProfileDevice::with_default_store(&config), block)
        }
        Action::Write { block, fill, verify } => {
            let store = MemoryBlockStore::with_block_count(config.block_count());
            run_write(&mut ProfileDevice::new(&config, store), block, fill, verify)
        }
        Action::Script => {
            let store = MemoryBlockStore::with_block_count(config.block_count());
            run_script(&mut ProfileDevice::new(&config, store))
        }
    };

    if let Err(e) = result {
        match &e {
            HostError::Protocol(p) if p.aborts_transaction() => {
                log::error!("Transaction aborted by drive: {}", p)
            }
            _ => log::error!("Transaction failed: {}", e),
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
