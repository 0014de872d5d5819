//! Disposal guidance per category.

use crate::category::TrashCategory;
use crate::i18n::Catalog;

/// Localized guidance for one category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisposalGuide {
    pub category: TrashCategory,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub references: &'static [&'static str],
}

/// Further reading for a category. Empty for `Other` and unrecognized labels.
pub fn references(category: &TrashCategory) -> &'static [&'static str] {
    match category {
        TrashCategory::Food => &[
            "https://www.epa.gov/recycle/composting-home",
            "https://changevn.org/huong-dan-u-phan/",
        ],
        TrashCategory::Glass => &[
            "http://monre.gov.vn/VN/Pages/Quan-ly-chat-thai-ran.aspx",
            "https://www.glassrecyclingcoalition.org/how-to-recycle-glass",
        ],
        TrashCategory::Metal => &[
            "https://www.recyclenow.com/recycling-knowledge/how-to-recycle/metal",
            "https://www.aluminum.org/recycling",
        ],
        TrashCategory::Paper => &[
            "https://www.recyclenow.com/recycling-knowledge/how-to-recycle/paper",
            "https://www.paperrecycles.org/about/recycling-facts",
        ],
        TrashCategory::Plastic => &[
            "https://www.recyclenow.com/recycling-knowledge/how-to-recycle/plastic",
            "https://www.plasticrecycling.org/recycling-basics",
        ],
        TrashCategory::Other | TrashCategory::Unrecognized(_) => &[],
    }
}

pub fn guide_for(category: &TrashCategory, catalog: &Catalog) -> DisposalGuide {
    let key = category.message_key();
    DisposalGuide {
        category: category.clone(),
        name: catalog.t(&format!("{}.name", key)),
        description: catalog.t(&format!("{}.description", key)),
        instructions: catalog.t(&format!("{}.disposalGuide.instructions", key)),
        references: references(category),
    }
}
