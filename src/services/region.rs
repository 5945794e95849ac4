//! Maps the region token at the end of a bucket name (`pennsieve-prod-storage-use1`)
//! to the AWS region hosting it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub full_name: &'static str,
    pub region_code: &'static str,
}

const REGIONS: &[(&str, RegionDescriptor)] = &[
    ("use1", region("US East (N. Virginia)", "us-east-1")),
    ("use2", region("US East (Ohio)", "us-east-2")),
    ("usw1", region("US West (N. California)", "us-west-1")),
    ("usw2", region("US West (Oregon)", "us-west-2")),
    ("afs1", region("Africa (Cape Town)", "af-south-1")),
    ("ape1", region("Asia Pacific (Hong Kong)", "ap-east-1")),
    ("aps1", region("Asia Pacific (Mumbai)", "ap-south-1")),
    ("apne1", region("Asia Pacific (Tokyo)", "ap-northeast-1")),
    ("apne2", region("Asia Pacific (Seoul)", "ap-northeast-2")),
    ("apne3", region("Asia Pacific (Osaka)", "ap-northeast-3")),
    ("apse1", region("Asia Pacific (Singapore)", "ap-southeast-1")),
    ("apse2", region("Asia Pacific (Sydney)", "ap-southeast-2")),
    ("cac1", region("Canada (Central)", "ca-central-1")),
    ("euc1", region("Europe (Frankfurt)", "eu-central-1")),
    ("euw1", region("Europe (Ireland)", "eu-west-1")),
    ("euw2", region("Europe (London)", "eu-west-2")),
    ("euw3", region("Europe (Paris)", "eu-west-3")),
    ("eun1", region("Europe (Stockholm)", "eu-north-1")),
    ("eus1", region("Europe (Milan)", "eu-south-1")),
    ("mes1", region("Middle East (Bahrain)", "me-south-1")),
    ("sae1", region("South America (Sao Paulo)", "sa-east-1")),
];

const fn region(full_name: &'static str, region_code: &'static str) -> RegionDescriptor {
    RegionDescriptor {
        full_name,
        region_code,
    }
}

/// Returns `None` when the suffix is not a known deployment region. Callers
/// treat that as a configuration error.
pub fn resolve(bucket_name: &str) -> Option<RegionDescriptor> {
    let suffix = bucket_name.rsplit('-').next()?.to_lowercase();
    REGIONS
        .iter()
        .find(|(code, _)| *code == suffix)
        .map(|(_, descriptor)| *descriptor)
}
