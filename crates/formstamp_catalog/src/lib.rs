use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const CATALOG_ID: &str = "formstamp.catalog";
pub const CATALOG_VERSION: &str = "1";

const FORMS_ID: &str = "formstamp.forms.v1";
const SYNONYMS_ID: &str = "formstamp.synonyms.v1";

/// One canonical field concept and the caller keys accepted for it.
///
/// `concept` is the Korean canonical term as it appears on printed forms.
/// `aliases` mixes English snake_case keys and Korean variants; lookups
/// compare them case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynonymDef {
    pub concept: &'static str,
    pub aliases: &'static [&'static str],
}

// Declaration order is the tie-break order. Concepts whose aliases are
// substrings of other concepts' field names ("name", "date") sit after the
// more specific ones.
pub const SYNONYMS_V1: [SynonymDef; 28] = [
    SynonymDef { concept: "사업장명", aliases: &["company_name", "company", "workplace", "workplace_name", "site_name", "회사명", "사업장"] },
    SynonymDef { concept: "사업자등록번호", aliases: &["business_number", "business_registration_number", "biz_no", "사업자번호"] },
    SynonymDef { concept: "관리자명", aliases: &["manager_name", "manager", "관리자", "담당자"] },
    SynonymDef { concept: "작성자", aliases: &["author_name", "author", "writer", "prepared_by", "작성자명"] },
    SynonymDef { concept: "화학물질명", aliases: &["chemical_name", "chemical", "substance_name", "substance", "물질명"] },
    SynonymDef { concept: "질병명", aliases: &["disease_name", "disease", "diagnosis", "상병명"] },
    SynonymDef { concept: "강사명", aliases: &["instructor_name", "instructor", "trainer", "강사"] },
    SynonymDef { concept: "근로자명", aliases: &["worker_name", "employee_name", "name", "성명", "이름", "근로자"] },
    SynonymDef { concept: "사번", aliases: &["employee_id", "employee_number", "emp_no", "worker_id", "사원번호"] },
    SynonymDef { concept: "부서", aliases: &["department", "dept", "부서명", "소속"] },
    SynonymDef { concept: "직종", aliases: &["job_type", "job", "occupation", "position", "직무", "직위"] },
    SynonymDef { concept: "생년월일", aliases: &["birth_date", "birthdate", "date_of_birth", "dob", "birthday"] },
    SynonymDef { concept: "검진일자", aliases: &["exam_date", "examination_date", "checkup_date", "검진일"] },
    SynonymDef { concept: "판정결과", aliases: &["exam_result", "result", "judgment", "judgement", "health_grade", "판정", "결과"] },
    SynonymDef { concept: "검진종류", aliases: &["exam_type", "examination_type", "checkup_type", "검진구분"] },
    SynonymDef { concept: "CAS번호", aliases: &["cas_number", "cas_no", "cas"] },
    SynonymDef { concept: "제조사", aliases: &["manufacturer", "maker", "supplier", "제조업체", "공급사"] },
    SynonymDef { concept: "재해발생일시", aliases: &["accident_datetime", "accident_date", "incident_date", "재해일시", "발생일시"] },
    SynonymDef { concept: "발생장소", aliases: &["accident_location", "incident_location", "accident_place", "재해장소"] },
    SynonymDef { concept: "보관장소", aliases: &["storage_location", "storage", "storage_place"] },
    SynonymDef { concept: "교육일자", aliases: &["education_date", "training_date", "교육일"] },
    SynonymDef { concept: "작성일자", aliases: &["report_date", "written_date", "created_date", "date", "작성일", "일자"] },
    SynonymDef { concept: "서명", aliases: &["signature", "sign", "signed_by", "날인"] },
    SynonymDef { concept: "비고", aliases: &["remarks", "remark", "notes", "note", "memo", "특이사항"] },
    SynonymDef { concept: "연락처", aliases: &["phone", "phone_number", "contact", "tel", "전화번호"] },
    SynonymDef { concept: "주소", aliases: &["address", "company_address", "소재지"] },
    SynonymDef { concept: "유해인자", aliases: &["hazard_factor", "hazard", "exposure_agent"] },
    SynonymDef { concept: "교육내용", aliases: &["education_content", "training_content", "curriculum"] },
];

// Compiled into the binary; runtime never reads the data directory.
const FORMS_V1_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/forms.v1.json"));

#[derive(Debug, Clone)]
pub struct CatalogMetadata {
    pub catalog_id: &'static str,
    pub catalog_version: &'static str,
    pub catalog_fingerprint_sha256: String,
    pub forms_id: &'static str,
    pub forms_hash_sha256: String,
    pub synonyms_id: &'static str,
    pub synonyms_hash_sha256: String,
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

static FORMS_HASH: OnceLock<String> = OnceLock::new();
static SYNONYMS_HASH: OnceLock<String> = OnceLock::new();
static CATALOG_FINGERPRINT: OnceLock<String> = OnceLock::new();

pub fn forms_v1_json() -> &'static str {
    FORMS_V1_JSON
}

pub fn forms_v1_hash_sha256() -> String {
    FORMS_HASH.get_or_init(|| hex_sha256(FORMS_V1_JSON.as_bytes())).clone()
}

/// Hash over the synonym table in declaration order, so a reorder changes it.
pub fn synonyms_v1_hash_sha256() -> String {
    SYNONYMS_HASH
        .get_or_init(|| {
            let mut canonical = String::new();
            for def in SYNONYMS_V1.iter() {
                canonical.push_str(def.concept);
                canonical.push('=');
                canonical.push_str(&def.aliases.join(","));
                canonical.push('\n');
            }
            hex_sha256(canonical.as_bytes())
        })
        .clone()
}

pub fn catalog_fingerprint_sha256() -> String {
    CATALOG_FINGERPRINT
        .get_or_init(|| {
            let parts = [
                CATALOG_ID.to_string(),
                CATALOG_VERSION.to_string(),
                FORMS_ID.to_string(),
                forms_v1_hash_sha256(),
                SYNONYMS_ID.to_string(),
                synonyms_v1_hash_sha256(),
            ];
            hex_sha256(parts.join("\n").as_bytes())
        })
        .clone()
}

pub fn synonym_defs_v1() -> &'static [SynonymDef] {
    &SYNONYMS_V1
}

pub fn synonym_def(concept: &str) -> Option<&'static SynonymDef> {
    SYNONYMS_V1.iter().find(|def| def.concept == concept)
}

pub fn metadata() -> CatalogMetadata {
    CatalogMetadata {
        catalog_id: CATALOG_ID,
        catalog_version: CATALOG_VERSION,
        catalog_fingerprint_sha256: catalog_fingerprint_sha256(),
        forms_id: FORMS_ID,
        forms_hash_sha256: forms_v1_hash_sha256(),
        synonyms_id: SYNONYMS_ID,
        synonyms_hash_sha256: synonyms_v1_hash_sha256(),
    }
}
