use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tactility_buildtools::app::{self, AppProject};
use tactility_buildtools::cdn::{firmware, sdk, upload};
use tactility_buildtools::executor::ExecCtx;
use tactility_buildtools::{Result, i18n, image, logging, sdkconfig};

#[derive(Debug, Parser)]
#[command(name = "tt", author, version, about = "Tactility build tools")]
struct Args {
    /// Debug logging (RUST_LOG overrides)
    #[arg(long, global = true)]
    verbose: bool,
    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate `sdkconfig` for a device
    Sdkconfig {
        /// Directory name under Devices/
        device_id: String,
        /// Development mode (4MB partition table)
        #[arg(long)]
        dev: bool,
        #[arg(long, default_value = sdkconfig::DEVICES_DIRECTORY)]
        devices_dir: PathBuf,
        #[arg(long, default_value = sdkconfig::DEFAULTS_PATH)]
        defaults: PathBuf,
        #[arg(long, default_value = "sdkconfig")]
        out: PathBuf,
    },
    /// Build (optionally) and merge flash_args binaries into one image
    MergeBin {
        /// Build command run through the shell
        #[arg(long, default_value = image::DEFAULT_BUILD_CMD)]
        build_cmd: String,
        #[arg(long, default_value = image::DEFAULT_BUILD_DIR)]
        build_dir: PathBuf,
        /// Skip the build step
        #[arg(long)]
        no_build: bool,
        /// Output file (default: <build-dir>/<board>-single_file.bin)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Gap fill byte, hex (0x..) or decimal
        #[arg(long, default_value = "0xFF")]
        fill: String,
        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = "sdkconfig")]
        sdkconfig: PathBuf,
    },
    /// CDN artifact generation and upload
    Cdn {
        #[command(subcommand)]
        cmd: CdnCommand,
    },
    /// Generate the translation header and .i18n files from a CSV
    I18n {
        /// CSV file name inside <root>/Translations
        csv_file: String,
        /// Header path relative to <root>
        header_file: String,
        /// C++ namespace of the generated enum
        namespace: String,
        /// Output directory relative to <root>
        i18n_dir: String,
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// External app build tool
    App {
        /// App project directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[command(subcommand)]
        cmd: AppCommand,
    },
}

#[derive(Debug, Subcommand)]
enum CdnCommand {
    /// Firmware manifests and device index from release builds
    Firmware {
        in_path: PathBuf,
        out_path: PathBuf,
        version: String,
        #[arg(long, default_value = firmware::DEFAULT_MAPPING_PATH)]
        mapping: PathBuf,
    },
    /// SDK archives and SDK index
    Sdk {
        in_path: PathBuf,
        out_path: PathBuf,
        version: String,
        /// Commit hash to record (default: git rev-parse HEAD)
        #[arg(long)]
        commit: Option<String>,
    },
    /// Upload a generated CDN directory
    Upload {
        dir: PathBuf,
        #[arg(long, default_value = upload::DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Backend as <kind>.<name> or a unique name
        #[arg(long)]
        backend: Option<String>,
        /// Object key prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Only upload index.json
        #[arg(long)]
        index_only: bool,
        /// Log planned uploads without executing them
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
enum AppCommand {
    /// Build the app for esp32, esp32s3 or all
    Build {
        platform: String,
        /// Use the SDK at TACTILITY_SDK_PATH
        #[arg(long)]
        local_sdk: bool,
        /// Run everything except the idf.py commands
        #[arg(long)]
        skip_build: bool,
        #[arg(long, default_value = app::DEFAULT_CDN_URL)]
        cdn_url: String,
    },
    /// Remove the build-* directories
    Clean,
    /// Remove the SDK cache
    Clearcache,
    /// Replace this executable with the latest published release
    Updateself,
    /// Print device info
    Info { ip: String },
    /// Start the app on a device
    Run { ip: String },
    /// Install the built app on a device
    Install { ip: String, platform: String },
}

fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init(args.verbose, args.log_json);
    if let Err(err) = dispatch(args.cmd) {
        logging::print_error(&err.to_string());
        std::process::exit(err.code());
    }
}

fn dispatch(cmd: Command) -> Result<()> {
    match cmd {
        Command::Sdkconfig {
            device_id,
            dev,
            devices_dir,
            defaults,
            out,
        } => sdkconfig::run(&sdkconfig::SdkconfigOptions {
            device_id,
            dev,
            devices_dir,
            defaults,
            out,
        }),
        Command::MergeBin {
            build_cmd,
            build_dir,
            no_build,
            out,
            fill,
            force,
            sdkconfig,
        } => {
            let opts = image::MergeOptions {
                build_cmd,
                build_dir,
                no_build,
                out,
                fill,
                force,
                sdkconfig,
            };
            image::run(&opts, &ExecCtx::default()).map(|_| ())
        }
        Command::Cdn { cmd } => cmd_cdn(cmd),
        Command::I18n {
            csv_file,
            header_file,
            namespace,
            i18n_dir,
            root,
        } => i18n::run(&i18n::I18nOptions {
            root,
            csv_file,
            header_file,
            namespace,
            i18n_dir,
        }),
        Command::App { project_dir, cmd } => cmd_app(&AppProject::new(project_dir), cmd),
    }
}

fn cmd_cdn(cmd: CdnCommand) -> Result<()> {
    match cmd {
        CdnCommand::Firmware {
            in_path,
            out_path,
            version,
            mapping,
        } => firmware::run(&firmware::FirmwareOptions {
            in_path,
            out_path,
            version,
            mapping,
        })
        .map(|_| ()),
        CdnCommand::Sdk {
            in_path,
            out_path,
            version,
            commit,
        } => sdk::run(
            &sdk::SdkOptions {
                in_path,
                out_path,
                version,
                commit,
            },
            &ExecCtx::default(),
        )
        .map(|_| ()),
        CdnCommand::Upload {
            dir,
            config,
            backend,
            prefix,
            index_only,
            dry_run,
        } => {
            let cfg = upload::UploadConfig::load_or_default(&config)?;
            let opts = upload::UploadOptions {
                dir,
                backend,
                prefix,
                index_only,
            };
            upload::run(&opts, &cfg, &ExecCtx::new(dry_run)).map(|_| ())
        }
    }
}

fn cmd_app(project: &AppProject, cmd: AppCommand) -> Result<()> {
    match cmd {
        AppCommand::Build {
            platform,
            local_sdk,
            skip_build,
            cdn_url,
        } => {
            let opts = app::BuildOptions {
                platform,
                local_sdk,
                skip_build,
                cdn_url,
            };
            app::build::run(project, &opts, &ExecCtx::default())
        }
        AppCommand::Clean => app::clean(project).map(|_| ()),
        AppCommand::Clearcache => app::clear_cache(project).map(|_| ()),
        AppCommand::Updateself => {
            let client = tactility_buildtools::http::client(std::time::Duration::from_secs(300))?;
            let exe = app::sdk::update_self(project, &client)?;
            println!("Updated {}", exe.display());
            Ok(())
        }
        AppCommand::Info { ip } => {
            let info = app::device::Device::new(&ip)?.info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        AppCommand::Run { ip } => {
            let id = project.app_id()?;
            app::device::Device::new(&ip)?.run_app(&id)?;
            println!("Started {id}");
            Ok(())
        }
        AppCommand::Install { ip, platform } => {
            let platform = app::resolve_platforms(&platform)?;
            let [platform] = platform.as_slice() else {
                return Err(tactility_buildtools::Error::msg(
                    "install needs a single platform (esp32 or esp32s3)",
                ));
            };
            let elf = project.find_elf(platform).ok_or_else(|| {
                tactility_buildtools::Error::msg(format!(
                    "No app ELF found in {}; build for {platform} first",
                    project.build_dir(platform).display()
                ))
            })?;
            app::device::Device::new(&ip)?.install(&elf)?;
            println!("Installed {}", elf.display());
            Ok(())
        }
    }
}
