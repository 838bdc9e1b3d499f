//! CLI front end: a ROM disassembler, a standalone EVM runner, and a block
//! applier, each a thin driver over the library's engines.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use primitive_types::U256;

use ethereum_core::block::{self, Block};
use ethereum_core::chain::ChainConfig;
use ethereum_core::evm::opcodes::OPCODES;
use ethereum_core::evm::{self, ExecutionEnvironment, Machine, NoBlockHashes, SubState};
use ethereum_core::rlp::Decodable;
use ethereum_core::state::{AccountBackend, TrieState};
use ethereum_core::trie::MemoryKvStore;

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a mnemonic listing of a hex-encoded ROM file.
    Disassemble {
        #[clap(short, long, parse(from_os_str))]
        filename: PathBuf,
    },
    /// Execute a hex-encoded ROM file against a fresh in-memory state with
    /// zero endowment and print the resulting halt reason and stack.
    Run {
        #[clap(short, long, parse(from_os_str))]
        filename: PathBuf,
        #[clap(long, default_value_t = 10_000_000)]
        gas_limit: u64,
    },
    /// Apply an RLP-encoded block to an RLP-encoded parent state root and
    /// print the holistic-validity result.
    ApplyBlock {
        #[clap(long, parse(from_os_str))]
        block_file: PathBuf,
        #[clap(long, parse(from_os_str))]
        config_file: Option<PathBuf>,
    },
}

fn load_hex_rom(filename: &PathBuf) -> Vec<u8> {
    let contents = fs::read_to_string(filename)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", filename.display()));
    hex::decode(contents.trim()).unwrap_or_else(|err| panic!("ROM is not valid hex: {err}"))
}

fn disassemble(filename: &PathBuf) {
    let code = load_hex_rom(filename);
    tracing::info!(bytes = code.len(), "disassembling ROM");

    let mut pc = 0usize;
    while pc < code.len() {
        let opcode = code[pc];
        match OPCODES.get(&opcode) {
            Some(info) => {
                let imm = &code[pc + 1..(pc + 1 + info.immediate_bytes as usize).min(code.len())];
                if imm.is_empty() {
                    println!("{pc:04x}: {}", info.mnemonic);
                } else {
                    println!("{pc:04x}: {} 0x{}", info.mnemonic, hex::encode(imm));
                }
                pc += 1 + info.immediate_bytes as usize;
            }
            None => {
                println!("{pc:04x}: UNKNOWN 0x{opcode:02x}");
                pc += 1;
            }
        }
    }
}

fn run(filename: &PathBuf, gas_limit: u64) {
    let code = load_hex_rom(filename);
    tracing::info!(bytes = code.len(), gas_limit, "running ROM");

    let mut state = TrieState::new(MemoryKvStore::default());
    let caller = primitive_types::H160::repeat_byte(0x11);
    let contract = primitive_types::H160::repeat_byte(0x22);

    let env = ExecutionEnvironment {
        address: contract,
        origin: caller,
        caller,
        call_value: U256::zero(),
        calldata: Vec::new(),
        code,
        gas_price: U256::one(),
        block_coinbase: primitive_types::H160::zero(),
        block_number: U256::one(),
        block_timestamp: 0,
        block_difficulty: U256::from(131_072u64),
        block_gas_limit: gas_limit,
        chain_id: U256::one(),
        depth: 0,
        is_static: false,
        block_hashes: Rc::new(NoBlockHashes),
    };
    let mut machine = Machine::new(gas_limit);
    let mut substate = SubState::default();
    let result = evm::run(&env, &mut machine, &mut state, &mut substate);

    println!("halt: {:?}", result.halt);
    println!("gas_left: {}", result.gas_left);
    println!("stack: {:?}", machine.stack);
}

fn apply_block(block_file: &PathBuf, config_file: &Option<PathBuf>) {
    let config = match config_file {
        Some(path) => ChainConfig::from_toml(path).unwrap_or_else(|err| panic!("bad config: {err}")),
        None => ChainConfig::default(),
    };

    let bytes = fs::read(block_file)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", block_file.display()));
    let block = Block::decode_bytes(&bytes).unwrap_or_else(|err| panic!("malformed block RLP: {err}"));

    tracing::info!(number = %block.header.number, transactions = block.transactions.len(), "applying block");

    let mut state = TrieState::new(MemoryKvStore::default());
    let block_hashes: Rc<dyn evm::BlockHashLookup> = Rc::new(NoBlockHashes);

    let mut header = block.header.clone();
    let receipts = match block::apply_block(&mut header, &block.transactions, &block.ommers, &config, &block_hashes, &mut state) {
        Ok(receipts) => receipts,
        Err(err) => {
            tracing::warn!(%err, "transaction rejected, aborting block application");
            println!("rejected: {err}");
            return;
        }
    };

    let mismatches = block::is_holistic_valid(&block.header, &block.transactions, &receipts, &block.ommers, &mut state);
    if mismatches.is_empty() {
        println!("valid: state_root={:?}", state.state_root());
    } else {
        tracing::warn!(?mismatches, "block failed holistic validity");
        println!("invalid: {mismatches:?}");
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    match &args.command {
        Commands::Disassemble { filename } => disassemble(filename),
        Commands::Run { filename, gas_limit } => run(filename, *gas_limit),
        Commands::ApplyBlock { block_file, config_file } => apply_block(block_file, config_file),
    }
}
