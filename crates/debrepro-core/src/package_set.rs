//! Package selection modes.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::http::{HttpError, PageSource};

pub const REQUIRED: &[&str] = &[
    "attr",
    "base-files",
    "base-passwd",
    "debconf",
    "debianutils",
    "diffutils",
    "dpkg",
    "findutils",
    "grep",
    "gzip",
    "init-system-helpers",
    "libselinux",
    "libsepol",
    "lsb",
    "mawk",
    "sed",
    "sysvinit",
    "pcre3",
    "perl",
    "util-linux",
    "zlib",
];

pub const ESSENTIAL: &[&str] = &[
    "debianutils",
    "diffutils",
    "e2fsprogs",
    "findutils",
    "perl",
    "sysvinit",
    "tar",
];

pub const POPULAR: &[&str] = &[
    "hostname",
    "netbase",
    "adduser",
    "tzdata",
    "bsdmainutils",
    "cpio",
    "logrotate",
    "debian-archive-keyring",
    "liblocale-gettext-perl",
    "net-tools",
    "ucf",
    "popularity-contest",
    "cron",
    "manpages",
    "libtext-wrapi18n-perl",
    "iptables",
    "ifupdown",
    "man-db",
    "mime-support",
    "pciutils",
    "libxml2",
    "initramfs-tools",
    "libcap2",
    "dmidecode",
    "busybox",
    "file",
    "less",
    "ca-certificates",
    "psmisc",
    "nano",
    "tasksel",
    "insserv",
    "installation-report",
    "laptop-detect",
    "linux-base",
    "xml-core",
    "aptitude",
    "bzip2",
    "os-prober",
    "acpid",
    "discover-data",
    "bash-completion",
    "dictionaries-common",
    "eject",
    "kmod",
    "whois",
    "iso-codes",
    "geoip-database",
    "bc",
    "acpi",
];

/// Fixed sample of arbitrary packages, for runs comparable across time.
pub const RANDOM: &[&str] = &[
    "golang-github-hlandau-xlog",
    "cal",
    "libpath-dispatcher-declarative-perl",
    "lunar-date",
    "pmailq",
    "aolserver4-nsxml",
    "node-tilelive-vector",
    "golang-github-hashicorp-go-getter",
    "yacpi",
    "libdata-stag-perl",
    "libnet-oauth2-perl",
    "libjs-jquery-dotdotdot",
    "libclass-c3-adopt-next-perl",
    "libobject-remote-perl",
    "libxml-rsslite-perl",
    "python-click-log",
    "cl-salza2",
    "globus-ftp-control",
    "childsplay-alphabet-sounds-sl",
    "fgetty",
    "xmlextras",
    "node-superagent",
    "django-memoize",
    "libtemplate-plugin-stash-perl",
    "systraq",
    "libtpl",
    "libdist-zilla-plugin-config-git-perl",
    "php-doctrine-cache-bundle",
    "tz-converter",
    "hackrf",
    "slice",
    "xfce4-taskmanager",
    "sshfs-fuse",
    "node-simplesmtp",
    "visionegg",
    "haskell-mutable-containers",
    "gvfs",
    "qdacco",
    "haskell-ghc-events",
    "ply",
    "dymo-cups-drivers",
    "ruby-bacon",
    "liblinux-usermod-perl",
    "puppet-module-puppetlabs-postgresql",
    "jalview",
    "masscan",
    "octave-gsl",
    "geronimo-ejb-3.2-spec",
    "haskell-pcap",
    "exuberant-ctags",
];

/// Which packages a batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageSet {
    Required,
    Essential,
    Popular,
    Random,
    /// A fresh sample of packages currently listed as reproducible.
    RandomFresh,
}

impl PackageSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageSet::Required => "required",
            PackageSet::Essential => "essential",
            PackageSet::Popular => "popular",
            PackageSet::Random => "random",
            PackageSet::RandomFresh => "random-fresh",
        }
    }

    /// Names of a fixed set; `None` for sets that must be fetched.
    pub fn fixed(&self) -> Option<Vec<String>> {
        let list = match self {
            PackageSet::Required => REQUIRED,
            PackageSet::Essential => ESSENTIAL,
            PackageSet::Popular => POPULAR,
            PackageSet::Random => RANDOM,
            PackageSet::RandomFresh => return None,
        };
        Some(list.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for PackageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(PackageSet::Required),
            "essential" => Ok(PackageSet::Essential),
            "popular" => Ok(PackageSet::Popular),
            "random" => Ok(PackageSet::Random),
            "random-fresh" | "random_fresh" => Ok(PackageSet::RandomFresh),
            other => Err(format!("unknown package set: {other}")),
        }
    }
}

/// Index of packages the reference site currently lists as reproducible.
pub fn reproducible_index_url(reference_base: &str, suite: &str, arch: &str) -> String {
    format!(
        "{}/debian/{suite}/{arch}/index_reproducible.html",
        reference_base.trim_end_matches('/')
    )
}

/// Text of every `<a class="package">` link on an index page.
pub fn parse_package_index(html: &str) -> Vec<String> {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let link = CELL.get_or_init(|| {
        Regex::new(r#"(?is)<a\b[^>]*\bclass\s*=\s*"[^"]*\bpackage\b[^"]*"[^>]*>\s*([^<\s]+)\s*</a>"#)
            .unwrap_or_else(|e| panic!("bad index pattern: {e}"))
    });
    link.captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Fetch the reproducible index and pick `count` packages at random.
pub async fn sample_fresh(
    pages: &dyn PageSource,
    index_url: &str,
    count: usize,
) -> Result<Vec<String>, HttpError> {
    let html = pages.get_text(index_url).await?;
    let all = parse_package_index(&html);
    let mut rng = rand::thread_rng();
    Ok(all
        .choose_multiple(&mut rng, count.min(all.len()))
        .cloned()
        .collect())
}
