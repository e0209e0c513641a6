use std::io::{self, Error};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use structopt::StructOpt;

use async_std::fs;
use async_std::task;

use vmi_semantic::{AttachOptions, KernelSpace, Profile, TaskWalker};

use privcheck::trusted::{self, AttributeTree};
use privcheck::{parse_addr, reconcile, report, PresencePolicy};

use log::{error, info};

#[derive(StructOpt)]
#[structopt(
    name = "privcheck",
    about = "Compares the process credentials in guest memory with the ones the guest reports"
)]
struct Opt {
    /// Guest physical memory: a memory device or a dump
    #[structopt(short, long, parse(from_os_str), default_value = "/dev/mem")]
    mem: PathBuf,

    /// Profile of the guest kernel (JSON)
    #[structopt(short, long, parse(from_os_str))]
    profile: PathBuf,

    /// System.map of the guest kernel, for symbols the profile lacks
    #[structopt(long, parse(from_os_str))]
    system_map: Option<PathBuf>,

    /// Per-process attribute tree exported by the guest
    #[structopt(short, long, parse(from_os_str), default_value = "/sys/kernel/debug/states")]
    states: PathBuf,

    /// Physical load address of the kernel
    #[structopt(long, parse(try_from_str = parse_addr), default_value = "0")]
    phys_base: u64,

    /// KASLR slide of the kernel symbols
    #[structopt(long, parse(try_from_str = parse_addr), default_value = "0")]
    kaslr_offset: u64,

    /// Page table base to use instead of the swapper's
    #[structopt(long, parse(try_from_str = parse_addr))]
    dtb: Option<u64>,

    /// Give up on a single read after this many milliseconds
    #[structopt(long)]
    timeout_ms: Option<u64>,

    /// Do not report processes only one view knows about
    #[structopt(long)]
    skip_unpaired: bool,
}

impl Opt {
    fn get_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    println!("The pid for this process is: {}", process::id());

    let code = task::block_on(run(opt));
    process::exit(code);
}

async fn run(opt: Opt) -> i32 {
    let dom = match attach(&opt).await {
        Ok(dom) => dom,
        Err(e) => {
            error!("{}", e);
            println!("Please check your VMI config for {}", opt.mem.display());
            return exitcode::CONFIG;
        }
    };

    match check(&opt, &dom).await {
        Ok(()) => exitcode::OK,
        Err(e) => {
            error!("{}", e);
            exitcode::IOERR
        }
    }
}

async fn attach(opt: &Opt) -> Result<KernelSpace, Error> {
    let profile = fs::read_to_string(&opt.profile).await?;
    let mut profile = Profile::from_json(&profile[..])?;
    if let Some(path) = &opt.system_map {
        let map = fs::read_to_string(path).await?;
        let added = profile.load_system_map(&map);
        info!("{} symbols from {}", added, path.display());
    }

    let dev = vmi::Device::open(&opt.mem)
        .await?
        .with_timeout(opt.get_timeout());
    let attach_opts = AttachOptions {
        phys_base: opt.phys_base,
        kaslr_offset: opt.kaslr_offset,
        dtb: opt.dtb,
    };
    let dom = KernelSpace::attach(dev, profile, &attach_opts).await?;
    Ok(dom)
}

async fn check(opt: &Opt, dom: &KernelSpace) -> Result<(), Error> {
    let introspected = TaskWalker::new(dom, dom.get_profile().get_offsets())
        .walk()
        .await?;

    let tree = AttributeTree::new(&opt.states).with_timeout(opt.get_timeout());
    info!("reading the attribute tree at {}", tree.get_base().display());
    let trusted = trusted::trusted_snapshot(&tree).await?;

    let presence = if opt.skip_unpaired {
        PresencePolicy::Skip
    } else {
        PresencePolicy::Report
    };
    let findings = reconcile(&introspected, &trusted, presence);

    let stdout = io::stdout();
    let summary = report::render(&mut stdout.lock(), &findings)?;
    info!("{}", summary);
    Ok(())
}
