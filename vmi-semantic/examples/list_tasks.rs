use async_std::fs;
use async_std::task;

use std::io;
use std::path::PathBuf;

use structopt::StructOpt;

use vmi_semantic::{AttachOptions, KernelSpace, Profile, TaskWalker};

#[derive(Debug, StructOpt)]
#[structopt(name = "list_tasks", about = "Prints the task list of a guest kernel")]
struct Opt {
    /// Guest physical memory
    #[structopt(short, long, parse(from_os_str), default_value = "/dev/mem")]
    mem: PathBuf,

    /// Profile of the guest kernel
    #[structopt(short, long, parse(from_os_str))]
    profile: PathBuf,

    /// Physical load address of the kernel
    #[structopt(long, parse(try_from_str = parse_hex), default_value = "0")]
    phys_base: u64,
}

fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() -> Result<(), io::Error> {
    env_logger::init();
    let opt = Opt::from_args();

    task::block_on(list_tasks(opt))
}

async fn list_tasks(opt: Opt) -> Result<(), io::Error> {
    let profile = Profile::from_json(&fs::read_to_string(&opt.profile).await?)?;
    let dev = vmi::Device::open(&opt.mem).await?;
    let opts = AttachOptions {
        phys_base: opt.phys_base,
        ..Default::default()
    };

    let dom = KernelSpace::attach(dev, profile, &opts).await?;
    println!("page table base: 0x{:x}", dom.get_k_vspace().get_ptb());

    let snapshot = TaskWalker::new(&dom, dom.get_profile().get_offsets())
        .walk()
        .await?;
    println!("{:>8} {:>8} {:>8} {:>8}", "PID", "PPID", "UID", "GID");
    for p in snapshot.iter() {
        println!(
            "{:>8} {:>8} {:>8} {:>8}",
            p.pid,
            show(p.ppid),
            show(p.uid),
            show(p.gid)
        );
    }
    Ok(())
}

fn show(v: Option<u32>) -> String {
    v.map_or_else(|| String::from("-"), |v| v.to_string())
}
