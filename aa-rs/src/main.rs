use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, H256, U256};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use zkaa::account::AccountContract;
use zkaa::config::{load_network, parse_addr, relative_to, write_network, Network};
use zkaa::encoding;
use zkaa::store::{ChainSnapshot, ChainStore};
use zkaa::types::Withdrawal;
use zkaa::{
    AaResult, AccountFactory, Chain, Curve, DigestProver, EcdsaVerifier, EntryPoint, OwnerSigner,
    SettlementProver, UserOperation,
};

const OWNER_KEY_ENV: &str = "ZKAA_OWNER_PRIVATE_KEY";

// In --json mode stdout carries exactly one JSON object; everything else goes
// to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "zkaa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new local chain with an EntryPoint and an AccountFactory.
    Genesis(GenesisArgs),

    /// Mint native funds to an address.
    Fund(FundArgs),

    /// Deploy, initialize and register a smart account.
    Account(AccountArgs),

    /// Add to an account's EntryPoint deposit.
    Deposit(DepositArgs),

    /// Withdraw from an account's EntryPoint deposit (owner-signed).
    Withdraw(WithdrawArgs),

    /// Sign and relay a transfer UserOperation.
    Send(SendArgs),

    /// Settle pending off-chain writes with a local attestation.
    Settle(SettleArgs),

    /// Print commitments, balances and nonces.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Network file written by `zkaa genesis`.
    #[arg(long, env = "ZKAA_NETWORK", default_value = "network.json")]
    network: PathBuf,

    /// Override the chain state file (otherwise uses the network file).
    #[arg(long, env = "ZKAA_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Print a single JSON object to stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct OwnerArgs {
    /// Owner private key (hex) on the network's curve.
    ///
    /// Recommended: source the `.secrets/` env file written by `zkaa account`.
    #[arg(long, env = OWNER_KEY_ENV, hide_env_values = true)]
    owner_private_key: Option<String>,
}

#[derive(Args, Debug)]
struct GenesisArgs {
    #[arg(long, default_value = "network.json")]
    network: PathBuf,

    /// Chain state file, relative to the network file.
    #[arg(long, default_value = "state/chain.json")]
    state_file: String,

    /// secp256k1 or secp256r1.
    #[arg(long, default_value = "secp256k1")]
    curve: String,

    /// Native funds minted to the deployer.
    #[arg(long, default_value_t = 1_000_000_000_000)]
    deployer_funds: u64,

    /// Replace an existing chain.
    #[arg(long, default_value_t = false)]
    force: bool,

    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct FundArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    to: String,

    #[arg(long)]
    amount: u64,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    owner: OwnerArgs,

    /// Generate a new owner key and write it under .secrets/ (never printed).
    #[arg(long, default_value_t = false)]
    new_owner: bool,

    /// Address paying the prefund and initial balance.
    #[arg(long, env = "ZKAA_FROM")]
    from: String,

    /// Amount moved into the EntryPoint deposit for fees.
    #[arg(long, default_value_t = 0)]
    prefund: u64,

    /// Native funds moved into the account itself.
    #[arg(long, default_value_t = 0)]
    initial_balance: u64,

    /// Deploy at this address instead of a random one.
    #[arg(long)]
    address: Option<String>,
}

#[derive(Args, Debug)]
struct DepositArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    account: String,

    #[arg(long)]
    amount: u64,

    #[arg(long, env = "ZKAA_FROM")]
    from: String,
}

#[derive(Args, Debug)]
struct WithdrawArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    owner: OwnerArgs,

    #[arg(long)]
    account: String,

    #[arg(long)]
    recipient: String,

    #[arg(long)]
    amount: u64,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    owner: OwnerArgs,

    /// Smart account sending the transfer.
    #[arg(long)]
    account: String,

    #[arg(long)]
    to: String,

    #[arg(long)]
    amount: u64,

    /// Flat fee paid from the account's deposit to the beneficiary.
    #[arg(long, default_value_t = 1_000)]
    fee: u64,

    /// Nonce lane.
    #[arg(long, default_value = "0")]
    key: String,

    /// Explicit nonce (otherwise the next expected one on the lane).
    #[arg(long)]
    nonce: Option<String>,

    /// Relayer credited with the fee.
    #[arg(long, env = "ZKAA_BENEFICIARY")]
    beneficiary: String,

    /// Print the signed operation without relaying it.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Wait until the operation's nonce is settled.
    #[arg(long, default_value_t = false)]
    wait: bool,

    /// Max seconds to wait for settlement. Use 0 to disable timeout.
    #[arg(long, default_value_t = 120)]
    max_wait_seconds: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SettleTarget {
    EntryPoint,
    Factory,
    All,
}

#[derive(Args, Debug)]
struct SettleArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, value_enum, default_value_t = SettleTarget::All)]
    target: SettleTarget,

    /// Transaction sender for the settle calls.
    #[arg(long, env = "ZKAA_FROM", default_value = "0x0000000000000000000000000000000000000000")]
    from: String,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Show deposit, nonce and balance of this account.
    #[arg(long)]
    account: Option<String>,

    /// Nonce lane shown for --account.
    #[arg(long, default_value = "0")]
    key: String,

    /// Resolve the account registered for this owner public key (hex SEC1).
    #[arg(long)]
    owner: Option<String>,

    /// Also print the audit events emitted by the EntryPoint and factory.
    #[arg(long, default_value_t = false)]
    events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Genesis(args) => cmd_genesis(args),
        Command::Fund(args) => cmd_fund(args),
        Command::Account(args) => cmd_account(args),
        Command::Deposit(args) => cmd_deposit(args),
        Command::Withdraw(args) => cmd_withdraw(args),
        Command::Send(args) => cmd_send(args).await,
        Command::Settle(args) => cmd_settle(args),
        Command::Show(args) => cmd_show(args),
    }
}

/// An opened network: its config and the handles to its contracts.
struct Session {
    network: Network,
    store: ChainStore,
    entry_point: EntryPoint,
    factory: AccountFactory,
}

impl Session {
    fn open(common: &CommonArgs) -> Result<Self> {
        let network = load_network(&common.network, common.state_file.clone())?;
        let store = ChainStore::new(network.state_file.clone());
        Ok(Self {
            entry_point: EntryPoint::at(network.entry_point),
            factory: AccountFactory::at(network.factory),
            store,
            network,
        })
    }

    fn chain_from(&self, snapshot: ChainSnapshot) -> Result<Chain> {
        if snapshot.curve != self.network.curve {
            bail!(
                "state file uses {} but network file says {}",
                snapshot.curve,
                self.network.curve
            );
        }
        Ok(Chain::from_snapshot(
            snapshot,
            Arc::new(EcdsaVerifier::new(self.network.curve)),
            Arc::new(DigestProver::new(self.network.prover_key)),
        ))
    }

    fn read(&self) -> Result<Chain> {
        let snapshot = self.store.load()?;
        self.chain_from(snapshot)
    }

    /// Load, apply `f`, save. The store stays locked throughout, and nothing
    /// is written if `f` fails.
    fn apply<T>(&self, f: impl FnOnce(&mut Chain) -> AaResult<T>) -> Result<T> {
        let _lock = self.store.lock()?;
        let mut chain = self.chain_from(self.store.load()?)?;
        let out = f(&mut chain)?;
        self.store.save(&chain.snapshot())?;
        Ok(out)
    }
}

fn cmd_genesis(args: GenesisArgs) -> Result<()> {
    let machine_mode = args.json;
    let curve = args
        .curve
        .parse::<Curve>()
        .map_err(|e| anyhow!("invalid --curve: {e}"))?;

    let network = Network {
        curve,
        state_file: PathBuf::from(&args.state_file),
        entry_point: random_address(),
        factory: random_address(),
        prover_key: H256::from(random_bytes32()),
    };
    let store = ChainStore::new(relative_to(&args.network, &args.state_file));

    // The network file names the deployed contracts, so it is only written
    // once the chain it describes has been saved.
    let _lock = store.lock()?;
    if store.exists() && !args.force {
        bail!(
            "chain state already exists at {} (pass --force to replace it)",
            store.path().display()
        );
    }

    let deployer = random_address();
    let mut chain = Chain::new(curve, Arc::new(DigestProver::new(network.prover_key)));
    chain.fund(deployer, args.deployer_funds)?;
    chain.transact(deployer, |tx| {
        EntryPoint::deploy(tx, network.entry_point)?;
        let factory = AccountFactory::deploy(tx, network.factory)?;
        factory.initialize(tx, network.entry_point)
    })?;
    store.save(&chain.snapshot())?;
    write_network(&args.network, &network.to_raw())?;

    if args.json {
        let out = serde_json::json!({
            "network": args.network.display().to_string(),
            "stateFile": store.path().display().to_string(),
            "curve": curve.to_string(),
            "entryPoint": encoding::fmt_address(network.entry_point),
            "factory": encoding::fmt_address(network.factory),
            "deployer": encoding::fmt_address(deployer),
        });
        println!("{}", out);
    }
    outln!(machine_mode, "network:        {}", args.network.display());
    outln!(machine_mode, "stateFile:      {}", store.path().display());
    outln!(machine_mode, "curve:          {}", curve);
    outln!(machine_mode, "entryPoint:     {}", encoding::fmt_address(network.entry_point));
    outln!(machine_mode, "factory:        {}", encoding::fmt_address(network.factory));
    outln!(machine_mode, "deployer:       {}", encoding::fmt_address(deployer));
    outln!(machine_mode, "deployerFunds:  {}", args.deployer_funds);
    Ok(())
}

fn cmd_fund(args: FundArgs) -> Result<()> {
    let session = Session::open(&args.common)?;
    let to = parse_addr(&args.to).context("invalid --to address")?;
    session.apply(|chain| chain.fund(to, args.amount))?;
    let balance = session.read()?.balance(to);

    if args.common.json {
        println!("{}", serde_json::json!({ "address": encoding::fmt_address(to), "balance": balance }));
    }
    outln!(args.common.json, "funded {} with {} (balance {})", encoding::fmt_address(to), args.amount, balance);
    Ok(())
}

fn cmd_account(args: AccountArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let session = Session::open(&args.common)?;
    let from = parse_addr(&args.from).context("invalid --from address")?;
    let address = match args.address.as_deref() {
        Some(a) => parse_addr(a).context("invalid --address")?,
        None => random_address(),
    };

    let signer = if args.new_owner {
        OwnerSigner::random(session.network.curve)
    } else {
        load_owner(&args.owner, session.network.curve)?
    };
    let owner = signer.owner_key();

    let factory = session.factory;
    session.apply(|chain| {
        chain.transact(from, |tx| {
            factory.deploy_account(tx, address, owner.clone(), args.prefund, args.initial_balance)
        })
    })?;

    // A generated key is only kept for an account that actually exists.
    let env_path = if args.new_owner {
        let path = owner_env_path(address)?;
        write_owner_env_file(&path, address, &signer)?;
        Some(path)
    } else {
        None
    };

    if let Some(p) = env_path.as_ref() {
        outln!(machine_mode, "generated new owner key; saved to {}", p.display());
    }
    if machine_mode {
        let out = serde_json::json!({
            "account": encoding::fmt_address(address),
            "owner": owner.to_string(),
            "envPath": env_path.as_ref().map(|p| p.display().to_string()),
        });
        println!("{}", out);
    }
    outln!(machine_mode, "account:        {}", encoding::fmt_address(address));
    outln!(machine_mode, "owner:          {}", owner);
    outln!(machine_mode, "entryPoint:     {}", encoding::fmt_address(session.network.entry_point));
    outln!(machine_mode, "prefund:        {}", args.prefund);
    outln!(machine_mode, "initialBalance: {}", args.initial_balance);
    Ok(())
}

fn cmd_deposit(args: DepositArgs) -> Result<()> {
    let session = Session::open(&args.common)?;
    let account = parse_addr(&args.account).context("invalid --account address")?;
    let from = parse_addr(&args.from).context("invalid --from address")?;
    let ep = session.entry_point;
    session.apply(|chain| chain.transact(from, |tx| ep.deposit_to(tx, account, args.amount)))?;

    let chain = session.read()?;
    let balance = ep.balance_of(chain.state(), account)?;
    if args.common.json {
        println!("{}", serde_json::json!({ "account": encoding::fmt_address(account), "deposit": balance }));
    }
    outln!(args.common.json, "deposited {} for {} (deposit now {}, unsettled)", args.amount, encoding::fmt_address(account), balance);
    Ok(())
}

fn cmd_withdraw(args: WithdrawArgs) -> Result<()> {
    let session = Session::open(&args.common)?;
    let account = parse_addr(&args.account).context("invalid --account address")?;
    let recipient = parse_addr(&args.recipient).context("invalid --recipient address")?;
    let signer = load_owner(&args.owner, session.network.curve)?;

    let digest = Withdrawal {
        account,
        recipient,
        amount: args.amount,
    }
    .hash();
    let signature = signer.sign_hash(digest)?;
    let ep = session.entry_point;
    session.apply(|chain| {
        chain.transact(recipient, |tx| ep.withdraw_to(tx, account, recipient, args.amount, &signature))
    })?;

    if args.common.json {
        println!(
            "{}",
            serde_json::json!({
                "account": encoding::fmt_address(account),
                "recipient": encoding::fmt_address(recipient),
                "amount": args.amount,
            })
        );
    }
    outln!(args.common.json, "withdrew {} from {} to {}", args.amount, encoding::fmt_address(account), encoding::fmt_address(recipient));
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let session = Session::open(&args.common)?;
    let account = parse_addr(&args.account).context("invalid --account address")?;
    let to = parse_addr(&args.to).context("invalid --to address")?;
    let beneficiary = parse_addr(&args.beneficiary).context("invalid --beneficiary address")?;
    let key = encoding::parse_u256_quantity(&args.key).context("invalid --key")?;
    let signer = load_owner(&args.owner, session.network.curve)?;
    let ep = session.entry_point;

    let nonce = match args.nonce.as_deref() {
        Some(n) => encoding::parse_u256_quantity(n).context("invalid --nonce")?,
        None => ep.get_nonce(session.read()?.state(), account, key)?,
    };
    let op = UserOperation::transfer(account, key, nonce, to, args.amount, args.fee);
    let user_op_hash = ep.get_user_op_hash(&op);
    let signature = signer.sign_hash(user_op_hash)?;

    outln!(
        machine_mode,
        "UserOperation:\n{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(&op))?
    );
    if args.dry_run {
        outln!(machine_mode, "\n--dry-run set: not relaying user operation.");
        if machine_mode {
            println!(
                "{}",
                serde_json::json!({
                    "userOp": encoding::user_op_to_json(&op),
                    "userOpHash": encoding::fmt_h256(user_op_hash),
                    "signature": encoding::fmt_bytes(signature.as_bytes()),
                })
            );
        }
        return Ok(());
    }

    session.apply(|chain| {
        chain.transact(beneficiary, |tx| ep.handle_op(tx, &op, &signature, beneficiary))
    })?;
    outln!(machine_mode, "\nuserOpHash: {}", encoding::fmt_h256(user_op_hash));

    let settled = if args.wait {
        wait_for_settlement(&session, account, key, nonce, Duration::from_secs(args.max_wait_seconds)).await?;
        outln!(machine_mode, "nonce {} on lane {} settled", nonce, key);
        true
    } else {
        false
    };

    if machine_mode {
        println!(
            "{}",
            serde_json::json!({
                "userOpHash": encoding::fmt_h256(user_op_hash),
                "sender": encoding::fmt_address(account),
                "key": encoding::fmt_u256(key),
                "nonce": encoding::fmt_u256(nonce),
                "settled": settled,
            })
        );
    }
    Ok(())
}

/// Poll the state file until the settled nonce of the lane passes `nonce`.
async fn wait_for_settlement(
    session: &Session,
    account: Address,
    key: U256,
    nonce: U256,
    timeout: Duration,
) -> Result<()> {
    let start = std::time::Instant::now();
    loop {
        if timeout.as_secs() > 0 && start.elapsed() > timeout {
            bail!("timed out waiting for settlement after {:?}", timeout);
        }

        match session.read() {
            Ok(chain) => {
                let settled = session.entry_point.settled_nonce(chain.state(), account, key)?;
                if settled > nonce {
                    return Ok(());
                }
            }
            Err(e) => {
                // The settler may be mid-write.
                tracing::warn!(error = %e, "state poll error");
            }
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
}

fn cmd_settle(args: SettleArgs) -> Result<()> {
    let session = Session::open(&args.common)?;
    let from = parse_addr(&args.from).context("invalid --from address")?;
    let prover = DigestProver::new(session.network.prover_key);
    let ep = session.entry_point;
    let factory = session.factory;
    let target = args.target;

    let settled = session.apply(|chain| {
        let mut out = Vec::new();
        if matches!(target, SettleTarget::EntryPoint | SettleTarget::All) {
            let updates = ep.pending_updates(chain.state())?;
            let proof = prover.prove(ep.settlement_input(chain.state())?);
            let commitment = chain.transact(from, |tx| ep.settle(tx, &proof))?;
            out.push(("entryPoint", ep.address(), updates, commitment));
        }
        if matches!(target, SettleTarget::Factory | SettleTarget::All) {
            let updates = factory.pending_updates(chain.state())?;
            let proof = prover.prove(factory.settlement_input(chain.state())?);
            let commitment = chain.transact(from, |tx| factory.settle(tx, &proof))?;
            out.push(("factory", factory.address(), updates, commitment));
        }
        Ok(out)
    })?;

    if args.common.json {
        let items: Vec<_> = settled
            .iter()
            .map(|(name, address, updates, commitment)| {
                serde_json::json!({
                    "contract": name,
                    "address": encoding::fmt_address(*address),
                    "updates": updates,
                    "commitment": encoding::fmt_h256(*commitment),
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "settled": items }));
    }
    for (name, address, updates, commitment) in &settled {
        outln!(
            args.common.json,
            "{name:<11} {} settled {updates} update(s), commitment {}",
            encoding::fmt_address(*address),
            encoding::fmt_h256(*commitment)
        );
    }
    Ok(())
}

fn cmd_show(args: ShowArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let session = Session::open(&args.common)?;
    let chain = session.read()?;
    let state = chain.state();
    let ep = session.entry_point;
    let factory = session.factory;

    let mut out = serde_json::json!({
        "curve": chain.curve().to_string(),
        "height": state.height(),
        "entryPoint": {
            "address": encoding::fmt_address(ep.address()),
            "commitment": encoding::fmt_h256(ep.commitment(state)?),
            "settlements": ep.settlements(state)?,
            "pendingUpdates": ep.pending_updates(state)?,
            "custody": chain.balance(ep.address()),
        },
        "factory": {
            "address": encoding::fmt_address(factory.address()),
            "commitment": encoding::fmt_h256(factory.commitment(state)?),
            "pendingUpdates": factory.pending_updates(state)?,
        },
    });

    if let Some(account) = args.account.as_deref() {
        let account = parse_addr(account).context("invalid --account address")?;
        let key = encoding::parse_u256_quantity(&args.key).context("invalid --key")?;
        let contract = AccountContract::at(account);
        let owner = contract.owner(state).map(|o| o.to_string()).ok();
        out["account"] = serde_json::json!({
            "address": encoding::fmt_address(account),
            "owner": owner,
            "balance": chain.balance(account),
            "deposit": ep.balance_of(state, account)?,
            "settledDeposit": ep.settled_balance_of(state, account)?,
            "key": encoding::fmt_u256(key),
            "nonce": encoding::fmt_u256(ep.get_nonce(state, account, key)?),
            "settledNonce": encoding::fmt_u256(ep.settled_nonce(state, account, key)?),
        });
    }

    if let Some(owner) = args.owner.as_deref() {
        let bytes = hex::decode(owner.trim_start_matches("0x")).context("invalid --owner hex")?;
        let owner = zkaa::OwnerKey::from_sec1(chain.curve(), &bytes)?;
        let account = factory.get_public_key(state, &owner)?;
        out["registry"] = serde_json::json!({
            "owner": owner.to_string(),
            "account": encoding::fmt_address(account),
            "registered": !account.is_zero(),
        });
    }

    if args.events {
        let events: Vec<_> = chain
            .events(Some(ep.address()))
            .into_iter()
            .chain(chain.events(Some(factory.address())))
            .map(|r| serde_json::to_value(r))
            .collect::<std::result::Result<_, _>>()?;
        out["events"] = serde_json::Value::Array(events);
    }

    if machine_mode {
        println!("{}", out);
    } else {
        println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Ok(())
}

fn random_bytes32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn random_address() -> Address {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    Address::from(bytes)
}

fn load_owner(args: &OwnerArgs, curve: Curve) -> Result<OwnerSigner> {
    let key = args
        .owner_private_key
        .as_deref()
        .ok_or_else(|| anyhow!("missing {OWNER_KEY_ENV} (or --owner-private-key)"))?;
    OwnerSigner::from_hex(curve, key).context("invalid owner private key")
}

fn owner_env_path(account: Address) -> Result<PathBuf> {
    Ok(choose_secrets_dir()?.join(format!("zkaa_owner_{}.env", hex::encode(account.as_bytes()))))
}

fn choose_secrets_dir() -> Result<PathBuf> {
    // Prefer the repo root `.secrets/` even when run from a subdirectory.
    let mut dir = std::env::current_dir().context("failed to read current dir")?;

    for _ in 0..6 {
        if dir.join(".git").exists() || dir.join("network.json").is_file() {
            return Ok(dir.join(".secrets"));
        }
        if !dir.pop() {
            break;
        }
    }

    let cwd = std::env::current_dir().context("failed to read current dir")?;
    Ok(cwd.join(".secrets"))
}

fn write_owner_env_file(path: &Path, account: Address, signer: &OwnerSigner) -> Result<()> {
    let contents = format!(
        "# Generated by zkaa account --new-owner\n# DO NOT COMMIT THIS FILE.\nexport {OWNER_KEY_ENV}={}\nexport ZKAA_ACCOUNT={}\nexport ZKAA_OWNER_CURVE={}\n",
        signer.to_hex(),
        encoding::fmt_address(account),
        signer.curve(),
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create .secrets dir")?;
    }

    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perm = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(path, perm);
    }

    Ok(())
}
