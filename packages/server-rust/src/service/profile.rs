//! User profile rendering from a region's cached service data.

use std::collections::HashSet;

use broker_core::xml::{element_name, element_or_text};
use broker_core::{ServiceDefinition, XmlElement, XmlNode};

use super::broker::{BrokerError, ServiceBroker};

impl ServiceBroker {
    /// Builds a `<user>` document from everything cached in `region`.
    ///
    /// Cached and static services with a cached body become child elements
    /// named after the service, ordered by name. Their cached tokens follow in
    /// a single `<tokens>` element, which is omitted when empty. Values that
    /// parse as XML are inlined; anything else is added as text. With
    /// `for_visualization`, services flagged `exclude_from_visible_profile`
    /// are left out. Names that are not legal XML names are repaired with
    /// [`element_name`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Repository`] if the definitions cannot be loaded.
    pub async fn user_profile(
        &self,
        region: &str,
        for_visualization: bool,
    ) -> Result<XmlElement, BrokerError> {
        let mut services = self
            .repository
            .cached_services()
            .await
            .map_err(BrokerError::Repository)?;
        services.extend(
            self.repository
                .static_services()
                .await
                .map_err(BrokerError::Repository)?,
        );

        let mut seen = HashSet::new();
        let mut services: Vec<ServiceDefinition> = services
            .into_iter()
            .filter(|service| seen.insert(service.id))
            // Flagged services are hidden from visualization, not the other way round.
            .filter(|service| !(for_visualization && service.exclude_from_visible_profile))
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        let mut user = XmlElement::new("user");
        let mut tokens = XmlElement::new("tokens");

        for service in &services {
            let Some(Some(body)) = self.cache.get_text(region, &service.cache_key()) else {
                continue;
            };
            user.push(XmlNode::Element(loaded(&service.name, &body)));

            for token in &service.tokens {
                if let Some(Some(value)) = self.cache.get_text(region, &token.cache_key()) {
                    tokens.push(XmlNode::Element(loaded(&token.name, &value)));
                }
            }
        }

        if tokens.elements().next().is_some() {
            user.push(XmlNode::Element(tokens));
        }
        Ok(user)
    }

    /// [`user_profile`](Self::user_profile) serialized as XML text.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Repository`] if the definitions cannot be loaded.
    pub async fn user_profile_xml(
        &self,
        region: &str,
        for_visualization: bool,
    ) -> Result<String, BrokerError> {
        Ok(self.user_profile(region, for_visualization).await?.to_xml())
    }
}

fn loaded(name: &str, raw: &str) -> XmlElement {
    let mut element = XmlElement::new(element_name(name));
    element.push(element_or_text(raw));
    element
}
